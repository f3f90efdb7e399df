// Screens: headless four-screen shell and the camera hand-off between screens.

pub mod navigator;
pub mod screen;
pub mod types;
pub mod ui;
