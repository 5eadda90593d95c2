//! Wiring shared by every command that talks to the backend.

use std::sync::Arc;

use anyhow::Result;
use storefront_client::{PostgrestProfiles, SupabaseAuth};
use storefront_kv::{KVStore, RedbStore};
use storefront_session::{Identity, Messages, SessionContext, SessionError};
use tracing::debug;

use crate::config::ClientConfig;

pub struct App {
    pub ctx: SessionContext,
    pub auth: Arc<SupabaseAuth>,
    pub json: bool,
}

impl App {
    /// Open local state and start the session context.
    pub fn open(config: &ClientConfig, json: bool) -> Result<Self> {
        let backend = config.backend()?;
        let db_path = config.data_dir().join("local.redb");
        debug!(path = %db_path.display(), "opening local state");

        let kv: Arc<dyn KVStore> = Arc::new(RedbStore::open(&db_path)?);
        let auth = Arc::new(SupabaseAuth::new(backend.clone(), kv.clone()));
        let profiles = Arc::new(PostgrestProfiles::new(backend, auth.clone()));
        let ctx = SessionContext::start(config.session.clone(), kv, auth.clone(), profiles)?;

        Ok(Self { ctx, auth, json })
    }

    pub fn messages(&self) -> Messages {
        self.ctx.synchronizer().messages()
    }

    /// Turn a session error into the user-facing message.
    pub fn fail(&self, err: SessionError) -> anyhow::Error {
        debug!(code = err.error_code(), error = %err, "command failed");
        anyhow::anyhow!(self.messages().describe(&err))
    }

    pub fn print_identity(&self, identity: &Identity) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(identity)?);
            return Ok(());
        }
        println!("{:<10} {}", "ID", identity.id);
        println!("{:<10} {}", "EMAIL", identity.email);
        println!("{:<10} {}", "NAME", identity.name);
        println!("{:<10} {}", "ROLE", identity.role);
        println!("{:<10} {}", "INITIALS", identity.initials());
        if let Some(avatar) = &identity.avatar {
            println!("{:<10} {}", "AVATAR", avatar);
        }
        if let Some(created) = identity.created_at {
            println!("{:<10} {}", "SINCE", created.format("%Y-%m-%d"));
        }
        Ok(())
    }
}
