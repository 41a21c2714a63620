//! BlueZ-backed [`RadioPort`] (Linux, feature `bluetooth`).
//!
//! Advertising uses a broadcast-type advertisement whose only payload is the
//! local name; dropping the registration handle withdraws it. Scanning runs an
//! LE discovery session with duplicate reporting on and forwards every named
//! device, and every later name or RSSI change, to the scan stream.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::stream::{SelectAll, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::radio::{RadioError, RadioOperation, RadioPort, RadioResult, ScanEvent, ScanStream};
use crate::types::ScanObservation;

/// Code reported when BlueZ ends a discovery session on its own.
const DISCOVERY_ENDED: i32 = -1;

type DeviceChanges = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

struct ScanSession {
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
}

#[derive(Default)]
struct RadioInner {
    advertisement: Option<AdvertisementHandle>,
    scan: Option<ScanSession>,
}

/// Radio backed by the default BlueZ adapter.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    inner: Mutex<RadioInner>,
}

fn driver_error(operation: RadioOperation, err: &bluer::Error) -> RadioError {
    RadioError::Driver {
        operation,
        message: err.to_string(),
    }
}

impl BluerRadio {
    /// Connect to BlueZ and pick the default adapter.
    ///
    /// # Errors
    ///
    /// [`RadioError::Unavailable`] if BlueZ or an adapter cannot be reached.
    pub async fn new() -> RadioResult<Self> {
        let session = Session::new().await.map_err(|err| {
            warn!(error = %err, "Cannot connect to BlueZ");
            RadioError::Unavailable
        })?;
        let adapter = session.default_adapter().await.map_err(|err| {
            warn!(error = %err, "No Bluetooth adapter");
            RadioError::Unavailable
        })?;

        info!(adapter = adapter.name(), "Bluetooth adapter ready");
        Ok(Self {
            _session: session,
            adapter,
            inner: Mutex::new(RadioInner::default()),
        })
    }

    async fn end_scan(session: ScanSession) {
        session.cancel.cancel();
        if let Err(err) = session.forwarder.await {
            warn!(error = %err, "Scan forwarder failed");
        }
    }
}

#[async_trait]
impl RadioPort for BluerRadio {
    async fn is_radio_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn set_local_name(&self, name: &str) -> RadioResult<()> {
        self.adapter
            .set_alias(name.to_string())
            .await
            .map_err(|err| driver_error(RadioOperation::SetLocalName, &err))
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        timeout: Option<Duration>,
    ) -> RadioResult<()> {
        let mut inner = self.inner.lock().await;
        drop(inner.advertisement.take());

        let advertisement = Advertisement {
            advertisement_type: Type::Broadcast,
            local_name: Some(local_name.to_string()),
            timeout,
            ..Default::default()
        };
        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|err| driver_error(RadioOperation::StartAdvertising, &err))?;

        debug!(local_name, ?timeout, "Advertising");
        inner.advertisement = Some(handle);
        Ok(())
    }

    async fn stop_advertising(&self) -> RadioResult<()> {
        if self.inner.lock().await.advertisement.take().is_some() {
            debug!("Advertisement withdrawn");
        }
        Ok(())
    }

    async fn start_scanning(&self) -> RadioResult<ScanStream> {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.scan.take() {
            Self::end_scan(previous).await;
        }

        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await
            .map_err(|err| driver_error(RadioOperation::StartScanning, &err))?;
        let discoveries = self
            .adapter
            .discover_devices()
            .await
            .map_err(|err| driver_error(RadioOperation::StartScanning, &err))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let forwarder = tokio::spawn(forward_discoveries(
            self.adapter.clone(),
            Box::pin(discoveries),
            tx,
            cancel.clone(),
        ));
        inner.scan = Some(ScanSession { cancel, forwarder });

        debug!("Scanning");
        Ok(rx)
    }

    async fn stop_scanning(&self) -> RadioResult<()> {
        let session = self.inner.lock().await.scan.take();
        if let Some(session) = session {
            Self::end_scan(session).await;
            debug!("Scan stopped");
        }
        Ok(())
    }
}

/// Pump adapter and device events into `tx` until cancelled or the receiver
/// goes away. Dropping `discoveries` ends the BlueZ discovery session.
async fn forward_discoveries(
    adapter: Adapter,
    mut discoveries: Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>,
    tx: mpsc::UnboundedSender<ScanEvent>,
    cancel: CancellationToken,
) {
    let mut changes: SelectAll<DeviceChanges> = SelectAll::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tx.closed() => break,
            event = discoveries.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    let Ok(device) = adapter.device(address) else { continue };
                    report_device(&device, &tx).await;
                    match device.events().await {
                        Ok(events) => changes.push(Box::pin(events.map(move |e| (address, e)))),
                        Err(err) => debug!(%address, error = %err, "Cannot watch device"),
                    }
                }
                Some(_) => {}
                None => {
                    let _ = tx.send(ScanEvent::Failed { code: DISCOVERY_ENDED });
                    break;
                }
            },
            Some((address, DeviceEvent::PropertyChanged(property))) = changes.next(),
                if !changes.is_empty() =>
            {
                if matches!(property, DeviceProperty::Rssi(_) | DeviceProperty::Name(_)) {
                    if let Ok(device) = adapter.device(address) {
                        report_device(&device, &tx).await;
                    }
                }
            }
        }
    }
}

async fn report_device(device: &Device, tx: &mpsc::UnboundedSender<ScanEvent>) {
    let (Ok(Some(name)), Ok(Some(rssi))) = (device.name().await, device.rssi().await) else {
        return;
    };
    let _ = tx.send(ScanEvent::Observation(ScanObservation::new(name, rssi)));
}
