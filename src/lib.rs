//! Parcel rerouter: redirect parcels to a drop-off spot while nobody is home.

pub mod browser;
pub mod calendar;
pub mod carriers;
pub mod channels;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod shipment;
