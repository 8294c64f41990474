pub mod alert;
pub mod bus;
pub mod line;
pub mod message;
pub mod patch;
pub mod stop;
pub mod vote;

pub use alert::{Alert, AlertCategory, AlertCursor, AlertFilter, AlertStatus, NewAlert, Page};
pub use bus::{Bus, BusPatch, BusPosition, BusSnapshot, LocatedBus, NewBus, NewPosition};
pub use line::{Line, LineDetail, LinePatch, LineStop, LineSummary, NewLine};
pub use stop::{NewStop, Stop, StopDetail, StopPatch};
pub use vote::{Vote, VoteDirection};
