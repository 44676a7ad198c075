//! Gesture directions, element coordinates, flick timing and pointer action
//! chains. Everything here is pure data; delivering the resulting motion is up
//! to the device.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CommandError, CommandResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// `self` moved by `(dx, dy)`. Moves that leave the `i32` plane are
    /// rejected.
    pub fn offset(self, dx: i32, dy: i32) -> CommandResult<Self> {
        match (self.x.checked_add(dx), self.y.checked_add(dy)) {
            (Some(x), Some(y)) => Ok(Self::new(x, y)),
            _ => Err(CommandError::invalid_argument(format!(
                "offset ({dx}, {dy}) from ({}, {}) is out of range",
                self.x, self.y
            ))),
        }
    }
}

/// Screen rectangle of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn location(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        )
    }
}

/// Unit multipliers for a named flick direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureVector {
    pub dx: i32,
    pub dy: i32,
}

impl GestureVector {
    pub fn scale(self, distance: i32) -> CommandResult<(i32, i32)> {
        match (self.dx.checked_mul(distance), self.dy.checked_mul(distance)) {
            (Some(dx), Some(dy)) => Ok((dx, dy)),
            _ => Err(CommandError::invalid_argument(format!(
                "flick distance {distance} is out of range"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlickDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FlickDirection {
    pub fn vector(self) -> GestureVector {
        let (dx, dy) = match self {
            FlickDirection::Up => (0, -1),
            FlickDirection::Down => (0, 1),
            FlickDirection::Left => (-1, 0),
            FlickDirection::Right => (1, 0),
        };
        GestureVector { dx, dy }
    }

    pub fn name(self) -> &'static str {
        match self {
            FlickDirection::Up => "up",
            FlickDirection::Down => "down",
            FlickDirection::Left => "left",
            FlickDirection::Right => "right",
        }
    }
}

impl fmt::Display for FlickDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlickDirection {
    type Err = CommandError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        [
            FlickDirection::Up,
            FlickDirection::Down,
            FlickDirection::Left,
            FlickDirection::Right,
        ]
        .into_iter()
        .find(|d| d.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| CommandError::invalid_argument(format!("unknown flick direction: {name}")))
    }
}

pub fn direction_from_name(name: &str) -> CommandResult<GestureVector> {
    Ok(name.parse::<FlickDirection>()?.vector())
}

/// Where an element sits. Screen, viewport and DOM coordinates are the same
/// point on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinates {
    element_id: String,
    point: Point,
}

impl Coordinates {
    pub fn new(element_id: impl Into<String>, point: Point) -> Self {
        Self {
            element_id: element_id.into(),
            point,
        }
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn on_screen(&self) -> Point {
        self.point
    }

    pub fn in_viewport(&self) -> Point {
        self.point
    }

    pub fn in_dom(&self) -> Point {
        self.point
    }
}

/// Lookup of element bounds by element id.
pub trait ElementLocator {
    fn element_bounds(&self, element_id: &str) -> Option<Rect>;
}

/// Element `"0"` addresses the screen itself.
pub const ROOT_ELEMENT: &str = "0";

pub fn resolve_element<L: ElementLocator + ?Sized>(
    locator: &L,
    element_id: &str,
) -> CommandResult<Coordinates> {
    if element_id == ROOT_ELEMENT {
        return Ok(Coordinates::new(element_id, Point::ORIGIN));
    }
    let bounds = locator
        .element_bounds(element_id)
        .ok_or_else(|| CommandError::StaleElement(element_id.to_string()))?;
    Ok(Coordinates::new(element_id, bounds.center()))
}

/// How a swipe is cut into move events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlickTiming {
    pub steps: u32,
    pub interval_ms: u64,
}

pub const SPEED_NORMAL: i32 = 0;
pub const SPEED_FAST: i32 = 1;
pub const SPEED_SLOW: i32 = 2;

const FIXED_INTERVAL_MS: u64 = 15;

impl FlickTiming {
    pub fn for_speed(speed: i32) -> Self {
        let steps = if speed == SPEED_SLOW { 8 } else { 4 };
        let interval_ms = match speed {
            SPEED_SLOW => 50,
            SPEED_NORMAL => 25,
            SPEED_FAST => 9,
            _ => 0,
        };
        Self { steps, interval_ms }
    }

    pub fn for_duration(duration_ms: u64) -> Self {
        let steps = (duration_ms / FIXED_INTERVAL_MS).max(1) as u32;
        let interval_ms = if duration_ms == 0 { 0 } else { FIXED_INTERVAL_MS };
        Self { steps, interval_ms }
    }

    pub fn total_ms(&self) -> u64 {
        u64::from(self.steps) * self.interval_ms
    }
}

/// Touch target of a pointer action: an element, an offset, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
}

impl Target {
    /// Element location (top-left) plus the offset. With no element the
    /// offset is absolute.
    pub fn position<L: ElementLocator + ?Sized>(&self, locator: &L) -> CommandResult<Point> {
        let offset = match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        };
        if self.element.is_none() && offset.is_none() {
            return Err(CommandError::invalid_argument(
                "pointer action needs an element or both x and y",
            ));
        }
        let base = match &self.element {
            Some(id) => locator
                .element_bounds(id)
                .ok_or_else(|| CommandError::StaleElement(id.clone()))?
                .location(),
            None => Point::ORIGIN,
        };
        match offset {
            Some((x, y)) => base.offset(x, y),
            None => Ok(base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum PointerAction {
    PointerDown(Target),
    PointerUp(Target),
    PointerMove(Target),
    Pause {
        #[serde(default)]
        ms: u64,
    },
    Flick {
        #[serde(default)]
        element: Option<String>,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
        direction: String,
        distance: i32,
        #[serde(default)]
        duration: u64,
    },
    PointerCancel,
}

impl PointerAction {
    /// Where the action touches down, if it touches at all.
    pub fn target(&self) -> Option<Target> {
        match self {
            PointerAction::PointerDown(t)
            | PointerAction::PointerUp(t)
            | PointerAction::PointerMove(t) => Some(t.clone()),
            PointerAction::Flick { element, x, y, .. } => Some(Target {
                element: element.clone(),
                x: *x,
                y: *y,
            }),
            PointerAction::Pause { .. } | PointerAction::PointerCancel => None,
        }
    }
}

/// One input device's queue of actions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionChain {
    #[serde(default)]
    pub id: Option<String>,
    pub input_device: String,
    pub actions: VecDeque<PointerAction>,
}

#[derive(Debug, Deserialize)]
struct ActionsPayload {
    payload: Vec<ActionChain>,
}

impl ActionChain {
    pub fn parse_payload(payload: Value) -> CommandResult<Vec<ActionChain>> {
        let parsed: ActionsPayload = serde_json::from_value(payload)?;
        Ok(parsed.payload)
    }
}

/// Actions that run together, followed by a pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// `(chain index, action)` pairs, pauses excluded.
    pub actions: Vec<(usize, PointerAction)>,
    pub pause_ms: u64,
}

/// Interleaves the chains: every tick takes the next action of each chain
/// that still has one and waits for the longest pause among them.
pub fn schedule(chains: Vec<ActionChain>) -> Vec<Tick> {
    let mut queues: Vec<VecDeque<PointerAction>> =
        chains.into_iter().map(|chain| chain.actions).collect();
    let mut ticks = Vec::new();
    loop {
        let mut tick = Tick {
            actions: Vec::new(),
            pause_ms: 0,
        };
        let mut progressed = false;
        for (index, queue) in queues.iter_mut().enumerate() {
            let Some(action) = queue.pop_front() else {
                continue;
            };
            progressed = true;
            match action {
                PointerAction::Pause { ms } => tick.pause_ms = tick.pause_ms.max(ms),
                other => tick.actions.push((index, other)),
            }
        }
        if !progressed {
            return ticks;
        }
        ticks.push(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct Bounds(HashMap<&'static str, Rect>);

    impl ElementLocator for Bounds {
        fn element_bounds(&self, element_id: &str) -> Option<Rect> {
            self.0.get(element_id).copied()
        }
    }

    fn bounds() -> Bounds {
        Bounds(HashMap::from([("btn", Rect::new(10, 20, 100, 40))]))
    }

    #[test]
    fn direction_vectors() {
        let up = direction_from_name("up").unwrap();
        assert_eq!((up.dx, up.dy), (0, -1));
        assert_eq!(direction_from_name("down").unwrap(), GestureVector { dx: 0, dy: 1 });
        assert_eq!(direction_from_name("left").unwrap(), GestureVector { dx: -1, dy: 0 });
        assert_eq!(direction_from_name("RIGHT").unwrap(), GestureVector { dx: 1, dy: 0 });
        assert_eq!(direction_from_name("right").unwrap().scale(30).unwrap(), (30, 0));
    }

    #[test]
    fn out_of_range_motion_is_invalid_argument() {
        let err = Point::new(10, 0).offset(i32::MAX, 0).unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));
        assert_eq!(Point::new(-10, 0).offset(i32::MAX, 0).unwrap(), Point::new(i32::MAX - 10, 0));

        let up = direction_from_name("up").unwrap();
        assert_eq!(up.scale(i32::MAX).unwrap(), (0, -i32::MAX));
        assert!(matches!(up.scale(i32::MIN), Err(CommandError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_direction_is_invalid_argument() {
        let err = direction_from_name("sideways").unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument(_)));
    }

    #[test]
    fn element_coordinates_share_one_point() {
        let coords = resolve_element(&bounds(), "btn").unwrap();
        assert_eq!(coords.on_screen(), Point::new(60, 40));
        assert_eq!(coords.in_viewport(), coords.on_screen());
        assert_eq!(coords.in_dom(), coords.on_screen());
        assert_eq!(coords.element_id(), "btn");
    }

    #[test]
    fn root_element_sits_at_origin() {
        let coords = resolve_element(&bounds(), ROOT_ELEMENT).unwrap();
        assert_eq!(coords.on_screen(), Point::ORIGIN);
    }

    #[test]
    fn unknown_element_is_stale() {
        let err = resolve_element(&bounds(), "gone").unwrap_err();
        assert!(matches!(err, CommandError::StaleElement(id) if id == "gone"));
    }

    #[test]
    fn rect_equality_covers_all_fields() {
        assert_eq!(Rect::new(1, 2, 3, 4), Rect::new(1, 2, 3, 4));
        assert_ne!(Rect::new(1, 2, 3, 4), Rect::new(1, 2, 4, 3));
    }

    #[test]
    fn flick_timing_tables() {
        assert_eq!(FlickTiming::for_speed(SPEED_SLOW), FlickTiming { steps: 8, interval_ms: 50 });
        assert_eq!(FlickTiming::for_speed(SPEED_NORMAL).total_ms(), 100);
        assert_eq!(FlickTiming::for_speed(SPEED_FAST), FlickTiming { steps: 4, interval_ms: 9 });
        assert_eq!(FlickTiming::for_speed(7).interval_ms, 0);

        assert_eq!(FlickTiming::for_duration(300), FlickTiming { steps: 20, interval_ms: 15 });
        assert_eq!(FlickTiming::for_duration(0), FlickTiming { steps: 1, interval_ms: 0 });
    }

    #[test]
    fn target_positions() {
        let locator = bounds();
        let target = Target {
            element: Some("btn".into()),
            x: Some(5),
            y: Some(6),
        };
        assert_eq!(target.position(&locator).unwrap(), Point::new(15, 26));

        let target = Target {
            x: Some(5),
            y: Some(6),
            ..Default::default()
        };
        assert_eq!(target.position(&locator).unwrap(), Point::new(5, 6));

        let target = Target {
            x: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            target.position(&locator),
            Err(CommandError::InvalidArgument(_))
        ));
    }

    #[test]
    fn parses_action_chains() {
        let chains = ActionChain::parse_payload(json!({
            "payload": [{
                "inputDevice": "touch",
                "id": "finger1",
                "actions": [
                    {"name": "pointerDown", "x": 1, "y": 2},
                    {"name": "pause", "ms": 500},
                    {"name": "flick", "element": "btn", "direction": "up", "distance": 30, "duration": 150},
                    {"name": "pointerCancel"},
                ],
            }],
        }))
        .unwrap();
        assert_eq!(chains.len(), 1);
        let actions = &chains[0].actions;
        assert_eq!(
            actions[0],
            PointerAction::PointerDown(Target {
                element: None,
                x: Some(1),
                y: Some(2)
            })
        );
        assert_eq!(actions[1], PointerAction::Pause { ms: 500 });
        assert!(matches!(&actions[2], PointerAction::Flick { distance: 30, .. }));
        assert_eq!(actions[3], PointerAction::PointerCancel);
    }

    #[test]
    fn unknown_action_name_is_rejected() {
        let err = ActionChain::parse_payload(json!({
            "payload": [{"inputDevice": "touch", "actions": [{"name": "wiggle"}]}],
        }))
        .unwrap_err();
        assert_eq!(err.status(), crate::Status::InvalidArgument);
    }

    #[test]
    fn schedule_interleaves_and_waits_for_longest_pause() {
        let chains = ActionChain::parse_payload(json!({
            "payload": [
                {"inputDevice": "touch", "actions": [
                    {"name": "pointerDown", "x": 0, "y": 0},
                    {"name": "pause", "ms": 100},
                    {"name": "pointerUp", "x": 0, "y": 0},
                ]},
                {"inputDevice": "touch", "actions": [
                    {"name": "pause", "ms": 300},
                    {"name": "pointerDown", "x": 9, "y": 9},
                ]},
            ],
        }))
        .unwrap();

        let ticks = schedule(chains);
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].pause_ms, 300);
        assert_eq!(ticks[0].actions.len(), 1);
        assert_eq!(ticks[1].pause_ms, 100);
        assert_eq!(ticks[1].actions[0].0, 1);
        assert_eq!(ticks[2].pause_ms, 0);
        assert!(matches!(ticks[2].actions[0].1, PointerAction::PointerUp(_)));
    }
}
