use async_trait::async_trait;
use sysinfo::System;

use crate::{runtime::HostInfo, GamecoreError, GamecoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reads host memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoHost;

/// A host with a fixed amount of memory. `None` behaves like a host that cannot be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticHost(pub Option<u64>);

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl HostInfo for SysinfoHost {
    async fn total_memory_mb(&self) -> GamecoreResult<u64> {
        let total = tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_memory();
            system.total_memory()
        })
        .await?;

        if total == 0 {
            return Err(GamecoreError::HostInfo(
                "operating system reported no memory".to_string(),
            ));
        }

        Ok(total / 1024 / 1024)
    }
}

#[async_trait]
impl HostInfo for StaticHost {
    async fn total_memory_mb(&self) -> GamecoreResult<u64> {
        self.0
            .ok_or_else(|| GamecoreError::HostInfo("host memory unavailable".to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_host() -> anyhow::Result<()> {
        assert_eq!(StaticHost(Some(8192)).total_memory_mb().await?, 8192);
        assert!(StaticHost(None).total_memory_mb().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_sysinfo_host_reports_memory() -> anyhow::Result<()> {
        assert!(SysinfoHost.total_memory_mb().await? > 0);
        Ok(())
    }
}
