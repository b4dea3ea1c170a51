//! Color resolution tables.
//!
//! Two translations happen here: the element-specific color of the control
//! buttons (a `'1'` color request resolves to the button's own fixed color),
//! and the hex values the simulation UI renders for each code.

use strike_types::{ids, ColorCode};

/// Fixed colors of the back-lit control buttons (elements 14–22).
const CONTROL_BUTTON_COLORS: [(u8, ColorCode); 9] = [
    (14, ColorCode::Green),
    (15, ColorCode::Yellow),
    (16, ColorCode::Blue),
    (17, ColorCode::Yellow),
    (18, ColorCode::Purple),
    (19, ColorCode::Red),
    (20, ColorCode::Blue),
    (21, ColorCode::Green),
    (22, ColorCode::Red),
];

/// The element-specific color a control button lights up in. Elements
/// outside the button panel default to green.
pub fn element_color(element_id: u8) -> ColorCode {
    if ids::CONTROL_BUTTONS.contains(&element_id) {
        CONTROL_BUTTON_COLORS
            .iter()
            .find(|(id, _)| *id == element_id)
            .map(|(_, c)| *c)
            .unwrap_or(ColorCode::Green)
    } else {
        ColorCode::Green
    }
}

/// Resolve a requested color to the concrete color driven on the hardware.
pub fn resolve(element_id: u8, color: ColorCode) -> ColorCode {
    match color {
        ColorCode::Element => element_color(element_id),
        other => other,
    }
}

/// Hex value the simulation UI displays for a color request on an element.
pub fn color_hex(element_id: u8, color: ColorCode) -> &'static str {
    match resolve(element_id, color) {
        ColorCode::Red => "#e74c3c",
        ColorCode::Green => "#27ae60",
        ColorCode::Blue => "#3498db",
        ColorCode::Yellow => "#f1c40f",
        ColorCode::Purple => "#9b59b6",
        ColorCode::Cyan => "#1abc9c",
        ColorCode::White => "#ecf0f1",
        ColorCode::Off => "#ffffff",
        ColorCode::Element => "#27ae60",
    }
}
