use core::time::Duration;
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;

use dotenvy::dotenv;
use libiot_connect::config::{ConnectionConfig, SessionConfig};
use libiot_connect::network::application::mqtt::{
    ConnectionState, Context, MessageId, QoS, SubscriptionEvent,
};
use libiot_connect::network::error::Error as NetError;
use libiot_connect::network::tls::{Tls, TlsError, TlsInitParams, Transport};
use libiot_connect::network::{Network, Protocol, SelectEntry, SocketHandle};
use libiot_connect::platform::{Bsp, Platform};
use libiot_connect::storage::memory::MemoryFs;
use libiot_connect::system::scheduler::TaskHandle;
use libiot_connect::system::Clock;

use crate::fake::SeededRng;

static RESOURCES: [(&str, &[u8]); 1] = [("roots.pem", b"plain tcp")];

fn io_error(e: std::io::Error, fallback: NetError) -> NetError {
    match e.kind() {
        ErrorKind::WouldBlock => NetError::WouldBlock,
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => NetError::ConnectionReset,
        _ => fallback,
    }
}

/// One non-blocking `TcpStream`, polled by peeking.
#[derive(Debug, Default)]
struct StdNet {
    stream: Option<TcpStream>,
}

impl StdNet {
    fn stream(&mut self, socket: SocketHandle) -> Result<&mut TcpStream, NetError> {
        match self.stream.as_mut() {
            Some(stream) if socket == SocketHandle(1) => Ok(stream),
            _ => Err(NetError::NotOpen),
        }
    }

    fn readable(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        match stream.peek(&mut [0u8; 1]) {
            Ok(_) => true,
            Err(e) => e.kind() != ErrorKind::WouldBlock,
        }
    }
}

impl Network for StdNet {
    fn connect(&mut self, host: &str, port: u16, protocol: Protocol) -> Result<SocketHandle, NetError> {
        if protocol != Protocol::Tcp {
            return Err(NetError::Unsupported);
        }
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::InvalidAddress)?
            .next()
            .ok_or(NetError::InvalidAddress)?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))
            .map_err(|_| NetError::ConnectionRefused)?;
        stream.set_nonblocking(true).map_err(|_| NetError::SocketError)?;
        self.stream = Some(stream);
        Ok(SocketHandle(1))
    }

    fn connection_check(&mut self, socket: SocketHandle) -> Result<(), NetError> {
        self.stream(socket).map(|_| ())
    }

    fn read(&mut self, socket: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError> {
        self.stream(socket)?
            .read(buf)
            .map_err(|e| io_error(e, NetError::ReadError))
    }

    fn write(&mut self, socket: SocketHandle, buf: &[u8]) -> Result<usize, NetError> {
        self.stream(socket)?
            .write(buf)
            .map_err(|e| io_error(e, NetError::WriteError))
    }

    fn select(&mut self, entries: &mut [SelectEntry], timeout_ms: u32) -> Result<usize, NetError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        loop {
            let readable = self.readable();
            let mut ready = 0;
            for entry in entries.iter_mut() {
                entry.error = self.stream.is_none();
                entry.ready.read = entry.interest.read && readable;
                entry.ready.write = entry.interest.write && self.stream.is_some();
                if entry.error || !entry.ready.is_empty() {
                    ready += 1;
                }
            }
            if ready > 0 || Instant::now() >= deadline {
                return Ok(ready);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn close(&mut self, socket: SocketHandle) -> Result<(), NetError> {
        self.stream(socket)?;
        self.stream = None;
        Ok(())
    }
}

/// Pass-through for brokers on plain TCP.
#[derive(Debug, Default)]
struct PlainTls;

impl Tls for PlainTls {
    type Session = ();

    fn init(&mut self, _params: &TlsInitParams<'_>) -> Result<(), TlsError> {
        Ok(())
    }

    fn connect(&mut self, _session: &mut (), _io: &mut dyn Transport) -> Result<(), TlsError> {
        Ok(())
    }

    fn read(&mut self, _session: &mut (), io: &mut dyn Transport, buf: &mut [u8]) -> Result<usize, TlsError> {
        match io.recv(buf) {
            Ok(n) => Ok(n),
            Err(NetError::WouldBlock) => Err(TlsError::WantRead),
            Err(_) => Err(TlsError::ReadError),
        }
    }

    fn write(&mut self, _session: &mut (), io: &mut dyn Transport, buf: &[u8]) -> Result<usize, TlsError> {
        match io.send(buf) {
            Ok(n) => Ok(n),
            Err(NetError::WouldBlock) => Err(TlsError::WantWrite),
            Err(_) => Err(TlsError::WriteError),
        }
    }

    fn pending(&self, _session: &()) -> bool {
        false
    }

    fn cleanup(&mut self, _session: ()) {}
}

#[derive(Debug)]
struct WallClock(Instant);

impl Clock for WallClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

struct Live;

impl Platform for Live {
    type Net = StdNet;
    type Tls = PlainTls;
    type Fs = MemoryFs<'static>;
    type Clock = WallClock;
    type Rng = SeededRng;
}

#[derive(Debug, Default)]
struct Echo {
    topic: String,
    acked: Vec<Option<MessageId>>,
    received: Vec<Vec<u8>>,
    failure: Option<libiot_connect::Error>,
}

type LiveCtx = Context<Live, Echo>;

fn on_state(ctx: &mut LiveCtx, state: ConnectionState, result: libiot_connect::Result<()>) {
    match (state, result) {
        (ConnectionState::Opened, Ok(())) => {
            let topic = ctx.app().topic.clone();
            if let Err(e) = ctx.subscribe(&topic, QoS::AtLeastOnce, on_echo) {
                ctx.app_mut().failure = Some(e);
                ctx.stop();
            }
        }
        (_, Err(e)) => {
            ctx.app_mut().failure = Some(e);
            ctx.stop();
        }
        _ => {}
    }
}

fn on_echo(ctx: &mut LiveCtx, event: SubscriptionEvent<'_>) {
    match event {
        SubscriptionEvent::Subscribed { result: Ok(_), .. } => {
            let topic = ctx.app().topic.clone();
            if let Err(e) = ctx.publish(&topic, b"hello from libiot", QoS::AtLeastOnce, false, Some(on_acked)) {
                ctx.app_mut().failure = Some(e);
                ctx.stop();
            }
        }
        SubscriptionEvent::Subscribed { result: Err(e), .. } => {
            ctx.app_mut().failure = Some(e);
            ctx.stop();
        }
        SubscriptionEvent::Message(message) => {
            ctx.app_mut().received.push(message.payload.to_vec());
            ctx.stop();
        }
    }
}

fn on_acked(ctx: &mut LiveCtx, id: Option<MessageId>, result: libiot_connect::Result<()>) {
    match result {
        Ok(()) => ctx.app_mut().acked.push(id),
        Err(e) => ctx.app_mut().failure = Some(e),
    }
}

fn give_up(ctx: &mut LiveCtx, _handle: TaskHandle) {
    ctx.app_mut().failure = Some(libiot_connect::Error::Timeout);
    ctx.stop();
}

#[test]
#[ignore = "needs a reachable MQTT broker"]
fn test_echo_through_public_broker() {
    dotenv().ok();
    let address = env::var("TEST_MQTT_ADDRESS").unwrap_or("test.mosquitto.org:1883".to_string());
    let (host, port) = address.rsplit_once(':').expect("address is host:port");
    let port: u16 = port.parse().expect("numeric port");

    let suffix: u32 = rand::random();
    let client_id = format!("libiot-connect-{suffix:08x}");
    let bsp = Bsp {
        net: StdNet::default(),
        tls: PlainTls,
        fs: MemoryFs::new(&RESOURCES),
        clock: WallClock(Instant::now()),
        rng: SeededRng::new(u64::from(suffix)),
    };
    let app = Echo {
        topic: format!("libiot-connect/{suffix:08x}/echo"),
        ..Echo::default()
    };
    let mut ctx = Context::new(bsp, SessionConfig::default(), app).unwrap();

    let config = ConnectionConfig::new(host, port, &client_id)
        .unwrap()
        .with_keepalive(10);
    ctx.open(config, Some(on_state)).unwrap();
    let guard = ctx
        .schedule_timed_task(give_up, Duration::from_secs(20), false)
        .unwrap();

    assert_eq!(
        ctx.process_blocking(),
        Err(libiot_connect::Error::EventProcessStopped)
    );
    assert_eq!(ctx.app().failure, None);
    assert_eq!(ctx.app().received, vec![b"hello from libiot".to_vec()]);

    ctx.cancel_timed_task(guard).unwrap();
    ctx.disconnect().unwrap();
    assert_eq!(ctx.process_blocking(), Ok(()));
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
}
