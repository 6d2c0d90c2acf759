use std::io;
use std::path::PathBuf;

use coach_session::{InferenceFacade, SessionConfig};
use tokio::runtime::{Builder, Runtime};

/// Opaque handle owning the facade and the runtime that drives its futures.
///
/// All methods take `&self`; `coach_cancel` may be called from another
/// thread while `coach_generate` blocks.
pub struct CoachRuntime {
    // Facade first: its worker must be joined before the runtime goes away.
    pub(crate) facade: InferenceFacade,
    pub(crate) runtime: Runtime,
}

impl CoachRuntime {
    pub fn new(model_dir: Option<PathBuf>) -> io::Result<Self> {
        let mut config = SessionConfig::from_env();
        if let Some(dir) = model_dir {
            config = config.with_model_dir(dir);
        }
        Self::with_config(config)
    }

    pub fn with_config(config: SessionConfig) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().build()?;
        let facade = InferenceFacade::spawn(config)?;
        Ok(Self { facade, runtime })
    }
}
