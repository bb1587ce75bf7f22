//! Parses the colon-delimited control tags the browser terminal sends out of
//! band instead of raw keystrokes.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTag {
    Resize { cols: u16, rows: u16 },
    SelectWindow(u32),
    SelectPane(char),
    ToggleZoom,
    ScrollUp(u32),
    ScrollDown(u32),
    ScrollExit,
    ShiftEnter,
    DisableMouse,
    FixBell,
    ListPanes(u32),
    ZoomPane(u32, u32),
    UnzoomPane,
    CapturePane(u32, u32),
}

pub fn parse_control_tag(text: &str) -> Option<ControlTag> {
    let (tag, rest) = text.split_once(':')?;
    match tag {
        "RESIZE" => {
            let (cols, rows) = rest.split_once(':')?;
            Some(ControlTag::Resize {
                cols: cols.parse().ok()?,
                rows: rows.parse().ok()?,
            })
        }
        "SELECT_WINDOW" => Some(ControlTag::SelectWindow(rest.parse().ok()?)),
        "SELECT_PANE" => {
            let dir = rest.chars().next()?;
            if matches!(dir, 'U' | 'D' | 'L' | 'R') {
                Some(ControlTag::SelectPane(dir))
            } else {
                None
            }
        }
        "TOGGLE_ZOOM" => Some(ControlTag::ToggleZoom),
        "SCROLL" => {
            let (direction, arg) = rest.split_once(':').unwrap_or((rest, ""));
            match direction {
                "up" => Some(ControlTag::ScrollUp(arg.parse().ok()?)),
                "down" => Some(ControlTag::ScrollDown(arg.parse().ok()?)),
                "exit" => Some(ControlTag::ScrollExit),
                _ => None,
            }
        }
        "SHIFT_ENTER" => Some(ControlTag::ShiftEnter),
        "DISABLE_MOUSE" => Some(ControlTag::DisableMouse),
        "FIX_BELL" => Some(ControlTag::FixBell),
        "LIST_PANES" => Some(ControlTag::ListPanes(rest.parse().ok()?)),
        "ZOOM_PANE" => {
            let (win, pane) = rest.split_once('.')?;
            Some(ControlTag::ZoomPane(win.parse().ok()?, pane.parse().ok()?))
        }
        "UNZOOM_PANE" => Some(ControlTag::UnzoomPane),
        "CAPTURE_PANE" => {
            let (win, pane) = rest.split_once('.')?;
            Some(ControlTag::CapturePane(win.parse().ok()?, pane.parse().ok()?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resize() {
        assert_eq!(parse_control_tag("RESIZE:120:40"), Some(ControlTag::Resize { cols: 120, rows: 40 }));
    }

    #[test]
    fn test_parse_select_pane_rejects_unknown_direction() {
        assert_eq!(parse_control_tag("SELECT_PANE:X"), None);
        assert_eq!(parse_control_tag("SELECT_PANE:U"), Some(ControlTag::SelectPane('U')));
    }

    #[test]
    fn test_parse_scroll_variants() {
        assert_eq!(parse_control_tag("SCROLL:up:5"), Some(ControlTag::ScrollUp(5)));
        assert_eq!(parse_control_tag("SCROLL:down:3"), Some(ControlTag::ScrollDown(3)));
        assert_eq!(parse_control_tag("SCROLL:exit"), Some(ControlTag::ScrollExit));
    }

    #[test]
    fn test_parse_zoom_pane_and_capture_pane() {
        assert_eq!(parse_control_tag("ZOOM_PANE:2.1"), Some(ControlTag::ZoomPane(2, 1)));
        assert_eq!(parse_control_tag("CAPTURE_PANE:0.0"), Some(ControlTag::CapturePane(0, 0)));
    }

    #[test]
    fn test_plain_keystrokes_are_not_control_tags() {
        assert_eq!(parse_control_tag("hello world"), None);
        assert_eq!(parse_control_tag("ls -la\n"), None);
    }
}
