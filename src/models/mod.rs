pub mod chat;
pub mod courier;
pub mod delivery;
pub mod location;
pub mod notification;
pub mod payment;
pub mod promo;
pub mod rating;
pub mod tracking;
