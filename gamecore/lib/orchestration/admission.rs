//! Memory admission control.
//!
//! Admission is a pass/fail check against host memory. If the host cannot be measured the
//! capacity checks are skipped rather than blocking the operation.

use crate::{
    models::{Game, Gameserver},
    runtime::HostInfo,
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the memory claimed by running and starting gameservers, leaving out `exclude`.
pub fn memory_in_use<'a>(
    fleet: impl IntoIterator<Item = &'a Gameserver>,
    exclude: Option<i64>,
) -> u64 {
    fleet
        .into_iter()
        .filter(|gameserver| Some(gameserver.id) != exclude)
        .filter(|gameserver| gameserver.status.claims_memory())
        .map(|gameserver| u64::from(gameserver.memory_mb))
        .sum()
}

/// Returns the total host memory, or `None` when it cannot be measured.
pub async fn host_total_memory(host: &dyn HostInfo) -> Option<u64> {
    match host.total_memory_mb().await {
        Ok(total) => Some(total),
        Err(e) => {
            tracing::warn!("skipping memory capacity check: {}", e);
            None
        }
    }
}

/// Checks the memory of a gameserver about to be created or resized.
///
/// The memory must reach the game's minimum and must not exceed the whole host on its own.
pub async fn check_creation(
    game: &Game,
    memory_mb: u32,
    host: &dyn HostInfo,
) -> GamecoreResult<()> {
    if memory_mb < game.min_memory_mb {
        return Err(GamecoreError::MemoryBelowMinimum {
            requested: memory_mb,
            minimum: game.min_memory_mb,
        });
    }

    if let Some(total) = host_total_memory(host).await {
        if u64::from(memory_mb) > total {
            return Err(GamecoreError::MemoryExceedsHost {
                requested: memory_mb,
                total,
            });
        }
    }

    Ok(())
}

/// Checks that starting `gameserver` keeps the fleet within host memory.
pub async fn check_start(
    gameserver: &Gameserver,
    fleet: &[Gameserver],
    host: &dyn HostInfo,
) -> GamecoreResult<()> {
    let Some(total) = host_total_memory(host).await else {
        return Ok(());
    };

    let in_use = memory_in_use(fleet, Some(gameserver.id));
    if in_use + u64::from(gameserver.memory_mb) > total {
        return Err(GamecoreError::InsufficientMemory {
            in_use,
            requested: gameserver.memory_mb,
            total,
        });
    }

    tracing::debug!(
        gameserver_id = gameserver.id,
        in_use,
        requested = gameserver.memory_mb,
        total,
        "memory admitted"
    );

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
