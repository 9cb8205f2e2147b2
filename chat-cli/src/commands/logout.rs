//! Forget the stored token.

use anyhow::{Context, Result};
use chat_client::TokenStore;
use std::path::Path;

/// Run the logout command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let store = TokenStore::new(data_dir);
    let had_token = store.load().await.ok().flatten().is_some();
    store.clear().await.context("Failed to remove stored token")?;

    if had_token {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}
