//! Turn-based decision engine for a simultaneous-move resource-collection
//! game on a toroidal grid. Each turn it classifies the fleet into roles,
//! scores mining prospects analytically, routes units with per-unit
//! searches over a shared depot cost field, and schedules commands under a
//! wall-clock budget.

pub mod constants;
pub mod context;
pub mod cost_field;
pub mod engine;
pub mod grid;
pub mod location;
pub mod model;
pub mod scheduler;
pub mod scoring;
pub mod search;
pub mod sites;
pub mod state;
