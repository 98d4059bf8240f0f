use std::error::Error;

use inhook_sdk::{ClientConfig, SessionController};
use tracing_subscriber::EnvFilter;

/// Creates a session (or resumes the one named by the first argument) and
/// prints captured requests as they arrive. Stop with Ctrl-C.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let resume_id = std::env::args().nth(1);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut controller = SessionController::new(ClientConfig::from_env())?;
        let session = match resume_id.as_deref() {
            Some(id) => controller.load_session(id).await?,
            None => controller.create_session().await?,
        };
        println!("session={} webhook_url={}", session.id, controller.webhook_url());
        if controller.copy_webhook_url() {
            println!("webhook url copied to clipboard");
        }

        let mut view = controller.subscribe();
        let mut printed = controller.event_count();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = view.borrow_and_update().clone();
                    if snapshot.event_count() > printed {
                        for event in snapshot.events().take(snapshot.event_count() - printed) {
                            println!(
                                "{} {} {} from {} ({} bytes)",
                                event.timestamp,
                                event.method,
                                event.url,
                                event.ip,
                                event.body.len()
                            );
                        }
                    }
                    printed = snapshot.event_count();
                }
            }
        }

        controller.close();
        Ok::<(), Box<dyn Error>>(())
    })
}
