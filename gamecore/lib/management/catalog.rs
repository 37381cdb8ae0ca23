//! The game catalog.
//!
//! Games are administered through a YAML file holding a list of [`GameDefinition`]s:
//!
//! ```yaml
//! - name: Minecraft
//!   image: itzg/minecraft-server
//!   ports:
//!     - { name: game, protocol: tcp, container_port: 25565 }
//!   config_vars:
//!     - { name: EULA, required: true, default: "TRUE" }
//!   min_memory_mb: 1024
//!   recommended_memory_mb: 4096
//! ```

use std::{collections::HashSet, path::Path};

use sqlx::{Pool, Sqlite};
use tokio::fs;

use crate::{
    management::db,
    models::{Game, GameDefinition},
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads a catalog file and upserts every game in it by name.
///
/// Returns the stored games in file order.
pub async fn import(pool: &Pool<Sqlite>, path: impl AsRef<Path>) -> GamecoreResult<Vec<Game>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).await?;
    let definitions: Vec<GameDefinition> = serde_yaml::from_str(&contents)?;

    let games = import_definitions(pool, &definitions).await?;
    tracing::info!(count = games.len(), "imported catalog from {}", path.display());
    Ok(games)
}

/// Upserts each definition by name.
pub async fn import_definitions(
    pool: &Pool<Sqlite>,
    definitions: &[GameDefinition],
) -> GamecoreResult<Vec<Game>> {
    let mut seen = HashSet::new();
    for definition in definitions {
        validate_definition(definition)?;
        if !seen.insert(definition.name.as_str()) {
            return Err(GamecoreError::InvalidValue {
                field: "name",
                reason: format!("game '{}' is defined twice", definition.name),
            });
        }
    }

    let mut games = Vec::with_capacity(definitions.len());
    for definition in definitions {
        games.push(upsert_game(pool, definition).await?);
    }

    Ok(games)
}

/// Creates the game, or overwrites the game with the same name.
pub async fn upsert_game(pool: &Pool<Sqlite>, definition: &GameDefinition) -> GamecoreResult<Game> {
    validate_definition(definition)?;

    match db::get_game_by_name(pool, &definition.name).await? {
        Some(existing) => {
            tracing::debug!(game_id = existing.id, "updating game {}", definition.name);
            db::update_game(pool, existing.id, definition).await
        }
        None => {
            tracing::debug!("adding game {}", definition.name);
            db::insert_game(pool, definition).await
        }
    }
}

/// Looks a game up by id, or by name when `key` is not a number.
pub async fn find_game(pool: &Pool<Sqlite>, key: &str) -> GamecoreResult<Game> {
    let game = match key.parse::<i64>() {
        Ok(id) => db::get_game(pool, id).await?,
        Err(_) => db::get_game_by_name(pool, key).await?,
    };

    game.ok_or_else(|| GamecoreError::GameNotFound(key.to_string()))
}

/// Checks a definition before it is stored.
fn validate_definition(definition: &GameDefinition) -> GamecoreResult<()> {
    if definition.name.trim().is_empty() {
        return Err(GamecoreError::InvalidValue {
            field: "name",
            reason: "game name must not be empty".to_string(),
        });
    }

    if definition.image.trim().is_empty() {
        return Err(GamecoreError::InvalidValue {
            field: "image",
            reason: format!("game '{}' has no image", definition.name),
        });
    }

    if definition.recommended_memory_mb != 0
        && definition.recommended_memory_mb < definition.min_memory_mb
    {
        return Err(GamecoreError::InvalidValue {
            field: "recommended_memory_mb",
            reason: format!(
                "game '{}' recommends less memory than its minimum",
                definition.name
            ),
        });
    }

    // Mappings sharing a name share a host port, so each name may appear once per protocol.
    let mut mappings = HashSet::new();
    for port in &definition.ports {
        if port.container_port == 0 || !mappings.insert((port.name.as_str(), port.protocol)) {
            return Err(GamecoreError::InvalidPortMapping(format!(
                "game '{}': {}",
                definition.name, port
            )));
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::models::Protocol;

    const CATALOG: &str = r#"
- name: Minecraft
  image: itzg/minecraft-server
  ports:
    - { name: game, protocol: tcp, container_port: 25565 }
  config_vars:
    - { name: EULA, required: true, default: "TRUE" }
  min_memory_mb: 1024
  recommended_memory_mb: 4096
- name: Valheim
  image: lloesche/valheim-server
  ports:
    - { name: game, protocol: udp, container_port: 2456 }
    - { name: query, protocol: udp, container_port: 2457 }
  min_memory_mb: 2048
"#;

    #[tokio::test]
    async fn test_import_upserts_by_name() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let pool = db::init_db(dir.path().join("gamecore.db")).await?;
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, CATALOG).await?;

        let games = import(&pool, &path).await?;
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].config_vars[0].default.as_deref(), Some("TRUE"));
        assert_eq!(games[1].ports[1].protocol, Protocol::Udp);

        // Importing again updates in place.
        fs::write(&path, CATALOG.replace("min_memory_mb: 2048", "min_memory_mb: 3072")).await?;
        let again = import(&pool, &path).await?;
        assert_eq!(again[1].id, games[1].id);
        assert_eq!(again[1].min_memory_mb, 3072);
        assert_eq!(db::list_games(&pool).await?.len(), 2);

        assert_eq!(find_game(&pool, "Valheim").await?.id, games[1].id);
        assert_eq!(
            find_game(&pool, &games[0].id.to_string()).await?.name,
            "Minecraft"
        );
        assert!(matches!(
            find_game(&pool, "Terraria").await,
            Err(GamecoreError::GameNotFound(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_definitions() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let pool = db::init_db(dir.path().join("gamecore.db")).await?;

        let duplicate_port = GameDefinition::builder()
            .name("Rust")
            .image("didstopia/rust-server")
            .ports(vec![
                "game:28015/udp".parse()?,
                "game:28016/udp".parse()?,
            ])
            .build();
        assert!(import_definitions(&pool, &[duplicate_port]).await.is_err());

        let twice = GameDefinition::builder().name("Ark").image("ark").build();
        assert!(import_definitions(&pool, &[twice.clone(), twice])
            .await
            .is_err());

        // Nothing was stored.
        assert!(db::list_games(&pool).await?.is_empty());

        Ok(())
    }
}
