pub mod airline;
pub mod ticket;
pub mod search;

pub use airline::{Airline, AirlineDirectory, AirlineUpdate, DEFAULT_LOGO_REF};
pub use ticket::{NewTicket, Ticket, TicketLedger};
pub use search::{Itinerary, ItineraryView, RouteSearch, SearchWindow, SortOrder};
