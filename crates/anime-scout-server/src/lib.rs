//! Anime Scout server: REST front end and process lifecycle for the
//! catalogue service.

pub mod rest;
