mod events;
mod hub;
mod session;

pub use events::CampaignEvent;
pub use hub::Hub;
pub use session::Session;
