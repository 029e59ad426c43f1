// Ad-hoc site adapters. Each one owns the quirks of a single publishing
// endpoint and degrades per record: a bad row is logged and dropped, the
// rest of the source still comes through.

pub mod calendar_api;
pub mod shows_api;
pub mod venue_calendar;

pub use calendar_api::CalendarApiSource;
pub use shows_api::ShowsApiSource;
pub use venue_calendar::VenueCalendarSource;
