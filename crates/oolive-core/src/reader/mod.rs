//! Card-reader station side: device polling, the session to the results
//! server, the daily card log and replay of recorded logs.

mod device;
mod discovery;
mod ingest;
mod log;
pub mod replay;
mod session;

pub use device::{CardPresence, CardReaderDevice, DeviceDiscovery, PunchRecord};
pub use discovery::{ReaderDriver, ReaderPort, SerialDiscovery, reader_ports};
pub use ingest::HardwareIngestLoop;
pub use log::CardLog;
pub use session::ReaderSessionClient;
