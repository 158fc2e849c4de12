use std::collections::HashMap;

use cucumber::World;
use ledger_engine::{
    db_types::{ExternalRef, User},
    events::EventProducers,
    test_utils::prepare_env::{create_database, random_db_path, run_migrations},
    ReconciliationApi,
    ReconciliationError,
    SqliteDatabase,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct LedgerWorld {
    pub system: Option<LedgerSystem>,
    /// Users registered during the scenario, by name
    pub users: HashMap<String, User>,
    /// The error returned by the most recent operation, if it failed
    pub last_error: Option<ReconciliationError>,
    /// The reference of the most recently created payment
    pub last_payment: Option<ExternalRef>,
}

#[derive(Debug)]
pub struct LedgerSystem {
    pub db_path: String,
    pub api: ReconciliationApi<SqliteDatabase>,
}

impl LedgerWorld {
    pub fn api(&self) -> &ReconciliationApi<SqliteDatabase> {
        &self.system.as_ref().expect("ReconciliationApi not initialised").api
    }

    pub fn user(&self, name: &str) -> &User {
        self.users.get(name).unwrap_or_else(|| panic!("User {name} has not been registered"))
    }
}

impl LedgerSystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        let api = ReconciliationApi::new(db, EventProducers::default());
        Self { db_path: url, api }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
