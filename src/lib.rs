#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

use std::sync::Arc;

use rocket::{Build, Rocket};

pub mod admission;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod realtime;
pub mod store;
pub mod tally;
pub mod timer;

use realtime::Hub;

/// Assemble the server: routes, broadcast hub, and the fairings that bring
/// up config, storage, and the campaign timers during ignition.
pub fn build() -> Rocket<Build> {
    configure(rocket::build())
}

fn configure(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/", api::routes())
        .manage(Arc::new(Hub::new()))
        .attach(config::ConfigFairing)
        .attach(store::StorageFairing)
        .attach(timer::TimerFairing)
        .attach(logging::LoggerFairing)
}
