//! External collaborators the board depends on but does not implement.

pub mod forecast;
pub mod schedule;

pub use forecast::{FixedForecast, ForecastSource, NoForecast};
pub use schedule::{
    RawSailing, RouteSchedule, ScheduleSource, SourceError, StaticScheduleSource, StatusSourceMeta,
};
