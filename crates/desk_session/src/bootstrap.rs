use std::path::Path;
use std::sync::Arc;
use tracing::info;

use desk_crypto::SystemProbe;
use desk_store::{Clock, FileKv, SessionRepository, SystemClock};

use crate::client::{AuthClient, DemoAuthClient, HttpAuthClient};
use crate::controller::AuthSessionController;
use crate::error::SessionError;
use crate::settings::SessionSettings;

/// Build a controller over the on-disk store described by `settings`, backed
/// by the HTTP auth client when a base URL is configured and the demo
/// accounts otherwise.
pub fn open_controller(
    settings: &SessionSettings,
    data_dir: &Path,
) -> Result<AuthSessionController, SessionError> {
    settings.validate()?;
    let kv = Arc::new(FileKv::open(settings.store_path(data_dir))?);
    info!("[session] store: {}", kv.path().display());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repo = SessionRepository::new(kv, Arc::new(SystemProbe), clock.clone());

    let client: Arc<dyn AuthClient> = match &settings.api_base_url {
        Some(url) => {
            let http = HttpAuthClient::new(url.clone())?;
            info!("[session] using auth service at {}", http.base_url());
            Arc::new(http)
        }
        None => {
            info!("[session] no auth service configured, using demo accounts");
            Arc::new(DemoAuthClient::new(clock))
        }
    };
    Ok(AuthSessionController::new(
        repo,
        client,
        settings.controller_options(),
    ))
}
