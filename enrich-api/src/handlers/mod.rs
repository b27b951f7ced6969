mod app;
mod status;
mod users;

#[cfg(test)]
mod test_utils;

pub use app::{add_routes, AppState};
