//! # Ui
//!
//! Drawing goes through an immediate-mode toolkit owned by the host. Components only need the handful of calls
//! below; each returns whether the user interacted with the widget this frame.

/// Immediate-mode widget calls used by components and hacks
pub trait Ui {
    /// Starts a window. Returns `false` if the window is collapsed, in which case nothing should be drawn into it,
    /// but [`Ui::end_window`] still has to be called.
    fn begin_window(&mut self, title: &str) -> bool;
    /// Ends the window started by [`Ui::begin_window`]
    fn end_window(&mut self);

    /// Plain text line
    fn text(&mut self, text: &str);
    /// Tooltip attached to the previous widget
    fn tooltip(&mut self, text: &str);
    /// Clickable button
    fn button(&mut self, label: &str) -> bool;
    /// Checkbox flipping `value` when clicked
    fn checkbox(&mut self, label: &str, value: &mut bool) -> bool;
    /// Float input field
    fn input_float(&mut self, label: &str, value: &mut f32) -> bool;

    /// Button showing an on/off state. `highlighted` is `false` when the active search doesn't match `label`.
    /// Does **not** flip `value` itself; the caller decides what a click means.
    fn toggle_button(&mut self, label: &str, value: bool, highlighted: bool) -> bool;

    /// Opens a popup with extra settings next to the previous widget. Returns `true` while the popup is open,
    /// in which case its contents are drawn and [`Ui::end_popup`] must be called.
    fn begin_popup(&mut self, id: &str) -> bool;
    /// Ends the popup started by [`Ui::begin_popup`]
    fn end_popup(&mut self);
}

/// Whether `label` contains `search`, ignoring case. An empty search matches everything.
pub fn matches_search(label: &str, search: &str) -> bool {
    search.is_empty() || label.to_lowercase().contains(&search.to_lowercase())
}
