use basalt_kubernetes::ResourceStore;
use basalt_mongo::DatabaseConnector;
use basalt_types::OperatorConfig;

/// Everything a reconciliation pass needs, built once at startup.
pub struct Context<S, D> {
    pub store: S,
    pub database: D,
    pub config: OperatorConfig,
}

impl<S: ResourceStore, D: DatabaseConnector> Context<S, D> {
    pub fn new(store: S, database: D, config: OperatorConfig) -> Self {
        Self {
            store,
            database,
            config,
        }
    }
}
