use axum::{routing::{get, post}, Router};
use rand::seq::IndexedRandom;
use tracing::info;

use crate::{config::SeedUser, error::SyncError, store::SqliteStore, AppState};

mod login;
mod logout;
mod me;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
        .route("/me", get(me::me))
}

const ADJECTIVES: [&str; 16] = [
    "Quick", "Lazy", "Jolly", "Brave", "Silent", "Witty", "Clever", "Gentle",
    "Calm", "Bold", "Proud", "Eager", "Rusty", "Golden", "Bright", "Lucky",
];

const NOUNS: [&str; 16] = [
    "Fox", "Bear", "Eagle", "Wolf", "Tiger", "Owl", "Rabbit", "Falcon",
    "Hawk", "Panda", "Phoenix", "Griffin", "Turtle", "Dolphin", "Whale", "Zebra",
];

fn random_alias() -> String {
    let mut rng = rand::rng();
    format!(
        "{} {}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("Nameless"),
        NOUNS.choose(&mut rng).copied().unwrap_or("User"),
    )
}

/// Makes sure every configured account exists. Users without a display name
/// get a random alias.
pub async fn seed_users(store: &SqliteStore, seeds: &[SeedUser]) -> Result<(), SyncError> {
    for seed in seeds {
        let display_name = seed.display_name.clone().unwrap_or_else(random_alias);
        let user = store.ensure_user(&seed.username, &seed.password, &display_name).await?;
        info!(user = %user.user_id, "account @{} ready as {}", user.username, user.display_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_is_repeatable() {
        let store = SqliteStore::in_memory().await.unwrap();
        let seeds = vec![
            SeedUser { username: "jay".into(), password: "pw".into(), display_name: Some("Jay".into()) },
            SeedUser { username: "bhautik".into(), password: "pw".into(), display_name: None },
        ];

        seed_users(&store, &seeds).await.unwrap();
        seed_users(&store, &seeds).await.unwrap();

        let jay = store.verify_credentials("jay", "pw").await.unwrap().unwrap();
        assert_eq!(jay.display_name, "Jay");
        let bhautik = store.verify_credentials("bhautik", "pw").await.unwrap().unwrap();
        assert!(bhautik.display_name.contains(' '));
    }
}
