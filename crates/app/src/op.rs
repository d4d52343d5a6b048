use std::error::Error;
use std::path::PathBuf;

use common::prelude::{Settings, SettingsError};

#[derive(Clone)]
pub struct OpContext {
    /// Where the settings file lives (~/.dockhand/settings.toml).
    pub settings_path: PathBuf,
    /// Loaded settings, falling back to defaults before `init` has run.
    pub settings: Settings,
}

impl OpContext {
    pub fn new() -> Result<Self, SettingsError> {
        let settings_path = Settings::default_path()?;
        let settings = Settings::load_or_default(&settings_path)?;
        Ok(Self {
            settings_path,
            settings,
        })
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
