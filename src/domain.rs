use crate::config::DomainConfiguration;
use crate::core::Result;
use crate::model::DomainModel;
use crate::optimizer::IndexOptimizer;
use crate::session::Session;
use crate::storage::StorageDriver;
use std::sync::Arc;
use tracing::info;

/// A model bound to a storage backend. Sessions opened from one domain share
/// its index optimizer and plan cache.
///
/// ```
/// use memorm::core::DataType;
/// use memorm::model::DomainBuilder;
/// use memorm::server_info::{DataTypeCollection, ServerInfo};
/// use memorm::{Domain, DomainConfiguration, MemoryStorage};
/// use std::sync::Arc;
///
/// let mut builder = DomainBuilder::new();
/// builder.entity("Author", |t| {
///     t.key("Id", DataType::Integer).field("Name", DataType::Text);
/// });
/// let model = Arc::new(builder.build().unwrap());
/// let server = ServerInfo::builder("memory")
///     .data_types(DataTypeCollection::complete())
///     .build()
///     .unwrap();
/// let storage = Arc::new(MemoryStorage::new(model, Arc::new(server)).unwrap());
/// let domain = Domain::new(storage, DomainConfiguration::default()).unwrap();
///
/// let mut session = domain.open_session();
/// let author = domain.model().type_by_name("Author").unwrap().id;
/// let key = session.create(author).unwrap();
/// session.set_value(&key, "Name", "Ursula").unwrap();
/// session.persist().unwrap();
/// ```
pub struct Domain {
    model: Arc<DomainModel>,
    storage: Arc<dyn StorageDriver>,
    optimizer: Arc<IndexOptimizer>,
    config: DomainConfiguration,
}

impl Domain {
    pub fn new(storage: Arc<dyn StorageDriver>, config: DomainConfiguration) -> Result<Self> {
        let model = Arc::clone(storage.model());
        let server = storage.server_info();
        model.validate_against(&server)?;
        let optimizer = Arc::new(IndexOptimizer::new(Arc::clone(&model), &config.optimizer));
        info!(server = server.name(), types = model.types().count(), "domain opened");
        Ok(Self {
            model,
            storage,
            optimizer,
            config,
        })
    }

    pub fn model(&self) -> &Arc<DomainModel> {
        &self.model
    }

    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    pub fn optimizer(&self) -> &Arc<IndexOptimizer> {
        &self.optimizer
    }

    pub fn config(&self) -> &DomainConfiguration {
        &self.config
    }

    pub fn open_session(&self) -> Session {
        Session::new(Arc::clone(&self.storage), Arc::clone(&self.optimizer), self.config.clone())
    }
}
