//! Seeds the database with users and prints a bearer token for each.
//!
//! `cargo run --bin seed_users -- 25`

use spock::{Config, auth, db};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let count: usize = match std::env::args().nth(1) {
        Some(raw) => raw.parse()?,
        None => 10,
    };

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database_url, 1).await?;

    for _ in 0..count {
        let name = auth::random_alias();
        let email = format!("{}@seed.local", Uuid::now_v7().simple());
        let (user, token) = auth::create_user(&db_pool, &name, &email).await?;
        println!("{}\t{}\t{}", user.id, user.name, token);
    }

    db_pool.close().await;
    Ok(())
}
