use rocket::Route;

pub mod auth;
pub mod campaign;
pub mod candidate;
pub mod live;
pub mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(campaign::routes());
    routes.extend(candidate::routes());
    routes.extend(voting::routes());
    routes.extend(live::routes());
    routes
}
