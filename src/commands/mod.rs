pub mod apply;
pub mod doctor;
pub mod fingerprint;
pub mod repair;
pub mod runlist;
pub mod status;
