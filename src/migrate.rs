use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;

/// `pth init`: create every session database and its tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let targets = [
        ("memory", config.db.memory_path()),
        ("claims", config.db.claims_path()),
        ("sections", config.db.sections_path()),
        ("index", config.db.index_path()),
    ];

    for (name, path) in &targets {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("opening {} database at {}", name, path.display()))?;
        match *name {
            "memory" => crate::memory::migrate(&pool).await?,
            "claims" => crate::claims::migrate(&pool).await?,
            "sections" => crate::sections::migrate(&pool).await?,
            _ => crate::index::migrate(&pool).await?,
        }
        pool.close().await;
        println!("  {:<9} {}", name, path.display());
    }

    println!("Databases initialized.");
    Ok(())
}
