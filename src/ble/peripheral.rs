//! SoftDevice advertising loop.
//!
//! [`SoftdevicePort`] records what the state machine asked for (broadcast
//! mode, rate-timer deadline); [`run`] turns those requests into futures
//! and feeds whatever completes first back into the machine as a
//! [`LinkEvent`]. Dropping the advertise future is how a broadcast stops.

use core::future::pending;

use defmt::{error, info, warn};
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use envnode::attributes::PeerId;
use envnode::ble::adv_data::{advertising_data, scan_response_data, AdPayload, ADVERTISED_SERVICES};
use envnode::ble::advertising::{
    AdvMode, AdvertisingPort, AdvertisingStateMachine, LinkEvent, TimerToken,
};
use envnode::config;
use envnode::error::TransportError;
use envnode::hal::DigitalOutputs;
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::server::{self, Server};
use crate::ble::SharedTable;

/// The SoftDevice does not report the HCI reason through `gatt_server::run`.
const DISCONNECT_REASON_UNKNOWN: u8 = 0;

pub struct SoftdevicePort {
    adv_data: AdPayload,
    scan_data: AdPayload,
    mode: Option<AdvMode>,
    rate_timer: Option<(Instant, TimerToken)>,
}

impl SoftdevicePort {
    pub fn new() -> Result<Self, TransportError> {
        let adv_data =
            advertising_data(&ADVERTISED_SERVICES).map_err(|_| TransportError::AdvertisingStart)?;
        let scan_data =
            scan_response_data(config::DEVICE_NAME).map_err(|_| TransportError::AdvertisingStart)?;
        Ok(Self {
            adv_data,
            scan_data,
            mode: None,
            rate_timer: None,
        })
    }

    /// The stack ended the broadcast on its own (connection or error).
    fn advertising_ended(&mut self) {
        self.mode = None;
    }
}

impl AdvertisingPort for SoftdevicePort {
    fn start_advertising(&mut self, mode: AdvMode) -> Result<(), TransportError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.mode = None;
    }

    fn arm_rate_timer(&mut self, delay_ms: u64, token: TimerToken) {
        self.rate_timer = Some((Instant::now() + Duration::from_millis(delay_ms), token));
    }

    fn cancel_rate_timer(&mut self) {
        self.rate_timer = None;
    }
}

enum Wake {
    Connected(Connection),
    Failed(TransportError),
    RateTimer(TimerToken),
}

async fn next_wake(sd: &'static Softdevice, port: &SoftdevicePort) -> Wake {
    let advertise = async {
        let Some(mode) = port.mode else {
            return pending().await;
        };
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &port.adv_data,
            scan_data: &port.scan_data,
        };
        // The SoftDevice takes a single interval; use the low end of the range.
        let (interval, _) = mode.interval();
        let adv_config = peripheral::Config {
            interval,
            ..Default::default()
        };
        peripheral::advertise_connectable(sd, adv, &adv_config).await
    };

    let rate_timer = async {
        match port.rate_timer {
            Some((deadline, token)) => {
                Timer::at(deadline).await;
                token
            }
            None => pending().await,
        }
    };

    match select(advertise, rate_timer).await {
        Either::First(Ok(conn)) => Wake::Connected(conn),
        Either::First(Err(e)) => {
            warn!("Advertising ended: {:?}", e);
            Wake::Failed(TransportError::AdvertisingAborted)
        }
        Either::Second(token) => Wake::RateTimer(token),
    }
}

/// Drive the advertising lifecycle forever.
pub async fn run<O: DigitalOutputs>(
    sd: &'static Softdevice,
    server: &'static Server,
    table: &'static SharedTable,
    outputs: &mut O,
) -> ! {
    let mut machine = AdvertisingStateMachine::new();

    let mut port = match SoftdevicePort::new() {
        Ok(port) => port,
        Err(e) => {
            error!("Advertising payload does not fit ({:?})", e);
            loop {
                pending::<()>().await;
            }
        }
    };

    machine.handle(&mut port, LinkEvent::Ready(None));

    loop {
        match next_wake(sd, &port).await {
            Wake::Connected(conn) => {
                port.advertising_ended();
                serve(&mut machine, &mut port, conn, server, table, outputs).await;
            }
            Wake::Failed(e) => {
                port.advertising_ended();
                machine.handle(&mut port, LinkEvent::AdvertisingFailed(e));
            }
            Wake::RateTimer(token) => {
                port.rate_timer = None;
                machine.handle(&mut port, LinkEvent::RateTimerFired(token));
            }
        }
    }
}

async fn serve<O: DigitalOutputs>(
    machine: &mut AdvertisingStateMachine,
    port: &mut SoftdevicePort,
    conn: Connection,
    server: &'static Server,
    table: &'static SharedTable,
    outputs: &mut O,
) {
    let peer: PeerId = conn.handle().unwrap_or(PeerId::MAX);
    machine.handle(port, LinkEvent::Connected { peer, error: None });
    request_conn_params(&conn);

    let _ = gatt_server::run(&conn, server, |event| {
        table.lock(|t| server::on_event(server, &mut t.borrow_mut(), outputs, peer, event));
    })
    .await;

    table.lock(|t| t.borrow_mut().drop_peer(peer));
    machine.handle(
        port,
        LinkEvent::Disconnected {
            peer,
            reason: DISCONNECT_REASON_UNKNOWN,
        },
    );

    drop(conn);
    machine.handle(port, LinkEvent::Recycled);
    info!("Connection {} released", peer);
}

fn request_conn_params(conn: &Connection) {
    let params = raw::ble_gap_conn_params_t {
        min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
        max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
        slave_latency: config::BLE_SLAVE_LATENCY,
        conn_sup_timeout: config::BLE_SUP_TIMEOUT,
    };
    if let Err(e) = conn.set_conn_params(params) {
        warn!("Connection parameter update refused: {:?}", e);
    }
}
