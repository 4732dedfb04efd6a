pub mod channel_grid;
pub mod filter_input;
pub mod status_bar;
