use cucumber::given;
use ledger_engine::db_types::NewUser;

use crate::cucumber::{LedgerSystem, LedgerWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut LedgerWorld) {
    let system = LedgerSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a user {word} with email {word}")]
async fn register_user(world: &mut LedgerWorld, name: String, email: String) {
    let user = world.api().register_user(NewUser::new(name.as_str(), email.as_str())).await.expect("Error registering user");
    world.users.insert(name, user);
}
