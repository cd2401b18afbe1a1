pub mod dispatch;
pub mod pipeline;

use crate::error::CliError;
use crate::logging::{self, LogFormat};

use hydra_service::HydraSettings;

/// Initialise tracing from settings, with `--log-format` taking precedence
pub(crate) fn init_logging(settings: &HydraSettings, log_format: Option<&str>) -> Result<(), CliError> {
    let format: LogFormat = log_format.unwrap_or(&settings.log_format).parse()?;
    logging::init_tracing(&settings.log_level, format)
}
