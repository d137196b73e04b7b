// ── Hardware ingest loop ──
//
// Runs on a dedicated blocking thread. Discovers a station, polls it for
// cards, logs every card read and forwards it through the reader session.
// Device faults never end the loop: the station is released, the server is
// told the reader is gone and discovery starts over after a pause.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use oolive_api::{CardReaderEntry, EntryType, ServerReply};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{CardPresence, CardReaderDevice, DeviceDiscovery};
use super::discovery::{ReaderDriver, SerialDiscovery};
use super::log::CardLog;
use super::session::ReaderSessionClient;
use crate::config::ReaderConfig;
use crate::error::DeviceError;

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Card-reader polling loop. Call [`run`](Self::run) from a blocking
/// thread (e.g. `tokio::task::spawn_blocking`).
pub struct HardwareIngestLoop<D> {
    discovery: D,
    session: ReaderSessionClient,
    log: CardLog,
    runtime: Handle,
    poll_interval: Duration,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl<R: ReaderDriver> HardwareIngestLoop<SerialDiscovery<R>> {
    /// Ingest loop over USB serial stations, set up from `config`.
    pub fn from_config(
        config: &ReaderConfig,
        driver: R,
        session: ReaderSessionClient,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            SerialDiscovery::new(driver, config.serial_number.clone()),
            session,
            CardLog::new(config.log_dir.clone()),
            runtime,
            cancel,
        )
        .with_intervals(config.poll_interval, config.device_retry)
    }
}

impl<D: DeviceDiscovery> HardwareIngestLoop<D> {
    /// `runtime` is the handle of the runtime driving `session`.
    pub fn new(
        discovery: D,
        session: ReaderSessionClient,
        log: CardLog,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            discovery,
            session,
            log,
            runtime,
            poll_interval: Duration::from_millis(200),
            retry_delay: Duration::from_secs(5),
            cancel,
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, retry_delay: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_delay = retry_delay;
        self
    }

    /// Process cards until cancelled.
    pub fn run(&mut self) {
        info!("processing cards");
        while !self.cancel.is_cancelled() {
            if let Err(e) = self.reader_session() {
                warn!(error = %e, retry_secs = self.retry_delay.as_secs(), "card reader fault");
                self.pause(self.retry_delay);
            }
        }
        debug!("ingest loop stopped");
    }

    /// One device lifetime: discover, serve until fault or cancel, release.
    fn reader_session(&mut self) -> Result<(), DeviceError> {
        let mut device = self.discovery.discover()?;

        let mut switched = false;
        let result = self.with_extended_protocol(device.as_mut(), &mut switched);

        // Leave the station the way we found it.
        let restored = if switched {
            debug!("switching reader back to basic protocol");
            device.set_extended_protocol(false)
        } else {
            Ok(())
        };
        if let Err(e) = device.disconnect() {
            debug!(error = %e, "error while disconnecting reader");
        }
        info!("card reader disconnected");
        self.announce(EntryType::ReaderDisconnected, None);

        result.and(restored)
    }

    fn with_extended_protocol(
        &mut self,
        device: &mut dyn CardReaderDevice,
        switched: &mut bool,
    ) -> Result<(), DeviceError> {
        match device.poll_card() {
            Ok(_) => {}
            Err(DeviceError::Protocol(reason)) => {
                debug!(%reason, "reader in basic protocol mode, switching to extended");
                device.set_extended_protocol(true)?;
                *switched = true;
            }
            Err(e) => return Err(e),
        }
        self.serve(device)
    }

    fn serve(&mut self, device: &mut dyn CardReaderDevice) -> Result<(), DeviceError> {
        self.announce(EntryType::ReaderConnected, None);
        while let Some(presence) = self.wait_for_card(device)? {
            match self.process_card(device, &presence) {
                Err(DeviceError::CardChanged) => {
                    warn!(card = presence.card_number, "card removed during read");
                    self.announce(EntryType::CardRemoved, None);
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Poll until a card is inserted. `None` once cancelled.
    fn wait_for_card(
        &self,
        device: &mut dyn CardReaderDevice,
    ) -> Result<Option<CardPresence>, DeviceError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(presence) = device.poll_card()? {
                return Ok(Some(presence));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn process_card(
        &mut self,
        device: &mut dyn CardReaderDevice,
        presence: &CardPresence,
    ) -> Result<(), DeviceError> {
        let card = presence.card_number.to_string();
        info!(%card, card_type = %presence.card_type, "card inserted");
        self.announce(EntryType::CardInserted, Some(card));

        let record = device.read_card()?;
        let entry = record.to_entry(now());
        match self.log.append(&entry) {
            Ok(path) => debug!(path = %path.display(), "card logged"),
            Err(e) => error!(error = %e, dir = %self.log.dir().display(), "cannot write card log"),
        }
        present(&entry);

        let reply = self
            .runtime
            .block_on(self.session.send_and_receive(&entry, None));
        if let Some(status) = reply.status() {
            info!(%status, "card accepted by server");
            device.ack_card()?;
        } else {
            warn!("no status from server, card not acknowledged");
        }
        Ok(())
    }

    fn announce(&self, entry_type: EntryType, card: Option<String>) -> ServerReply {
        self.runtime
            .block_on(self.session.set_state(entry_type, now(), card))
    }

    /// Sleep for `total`, waking early on cancellation.
    fn pause(&self, total: Duration) {
        let step = self.poll_interval.max(Duration::from_millis(10));
        let mut slept = Duration::ZERO;
        while slept < total && !self.cancel.is_cancelled() {
            std::thread::sleep(step);
            slept += step;
        }
    }
}

fn present(entry: &CardReaderEntry) {
    let Some(card) = &entry.card else {
        return;
    };
    let fmt = |t: Option<DateTime<FixedOffset>>| {
        t.map_or_else(|| "--:--:--".to_owned(), |t| t.format("%H:%M:%S").to_string())
    };
    info!(
        entry_time = %entry.entry_time.format("%H:%M:%S"),
        card = entry.control_card.as_deref().unwrap_or_default(),
        card_type = %card.card_type,
        start = %fmt(card.start_time),
        finish = %fmt(card.finish_time),
        controls = card.punches.len(),
        "card read"
    );
}
