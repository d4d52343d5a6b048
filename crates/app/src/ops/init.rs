use clap::Args;

use common::prelude::{Settings, SettingsError};

#[derive(Args, Debug, Clone)]
pub struct Init;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("settings already exist at {0}")]
    AlreadyInitialized(String),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        if ctx.settings_path.exists() {
            return Err(InitError::AlreadyInitialized(
                ctx.settings_path.display().to_string(),
            ));
        }

        Settings::default().save(&ctx.settings_path)?;
        Ok(format!("wrote {}", ctx.settings_path.display()))
    }
}
