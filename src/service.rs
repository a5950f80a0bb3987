//! systemd unit files and the service manager that loads them

use crate::errors::Result;
use async_trait::async_trait;
use log::{debug, info};
use zbus::{Connection, Proxy};
use zvariant::OwnedObjectPath;

const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const SYSTEMD_MANAGER: &str = "org.freedesktop.systemd1.Manager";

/// A `simple` service unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub exec_start: String,
    pub restart: String,
    pub restart_sec: u32,
}

impl ServiceUnit {
    pub fn render(&self) -> String {
        format!(
            "[Unit]\n\
             Description={}\n\
             After=multi-user.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={}\n\
             Restart={}\n\
             RestartSec={}\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            self.description, self.exec_start, self.restart, self.restart_sec
        )
    }
}

/// Operations needed on the init system
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Re-read unit files from disk
    async fn reload(&self) -> Result<()>;
    async fn enable(&self, unit: &str) -> Result<()>;
    async fn disable(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    async fn stop(&self, unit: &str) -> Result<()>;
}

/// systemd reached through its manager object on the system bus
pub struct SystemdManager {
    connection: Connection,
}

impl SystemdManager {
    pub async fn connect() -> Result<Self> {
        let connection = Connection::system().await?;
        info!("Connected to the systemd manager");
        Ok(Self { connection })
    }

    async fn manager(&self) -> Result<Proxy<'static>> {
        Ok(Proxy::new(
            &self.connection,
            SYSTEMD_DESTINATION,
            SYSTEMD_PATH,
            SYSTEMD_MANAGER,
        )
        .await?)
    }
}

#[async_trait]
impl ServiceManager for SystemdManager {
    async fn reload(&self) -> Result<()> {
        debug!("systemd: Reload");
        let _: () = self.manager().await?.call("Reload", &()).await?;
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        debug!("systemd: EnableUnitFiles {}", unit);
        let (_, changes): (bool, Vec<(String, String, String)>) = self
            .manager()
            .await?
            .call("EnableUnitFiles", &(vec![unit], false, true))
            .await?;
        for (kind, link, target) in changes {
            info!("systemd: {} {} -> {}", kind, link, target);
        }
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        debug!("systemd: DisableUnitFiles {}", unit);
        let _: Vec<(String, String, String)> = self
            .manager()
            .await?
            .call("DisableUnitFiles", &(vec![unit], false))
            .await?;
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        debug!("systemd: RestartUnit {}", unit);
        let job: OwnedObjectPath = self
            .manager()
            .await?
            .call("RestartUnit", &(unit, "replace"))
            .await?;
        debug!("systemd job {}", job.as_str());
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        debug!("systemd: StopUnit {}", unit);
        let _: OwnedObjectPath = self
            .manager()
            .await?
            .call("StopUnit", &(unit, "replace"))
            .await?;
        Ok(())
    }
}
