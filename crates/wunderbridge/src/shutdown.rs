use tokio::sync::watch;

/// Shutdown channel fired once on SIGINT/SIGTERM.
///
/// Station tasks, the MQTT event loop and the metrics server each hold a
/// receiver and stop at their next wait point; the metrics server also
/// finishes in-flight scrapes. `main` keeps the sender and returns as soon
/// as the signal arrives.
pub fn setup_shutdown() -> Result<(watch::Sender<()>, watch::Receiver<()>), ctrlc::Error> {
    let (tx, rx) = watch::channel(());
    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        let _ = signal_tx.send(());
    })?;
    Ok((tx, rx))
}
