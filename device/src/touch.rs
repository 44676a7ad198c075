//! Turns gesture commands into screen injections.

use std::time::Duration;

use wire::gesture::{
    ActionChain, FlickTiming, Point, PointerAction, Target, direction_from_name, resolve_element,
    schedule,
};
use wire::{CommandError, CommandResult};

use crate::screen::{MotionAction, Screen};

pub const TOUCH_DEVICE: &str = "touch";
pub const LONG_PRESS_MS: u64 = 1000;
/// Speed-only flicks cover the distance travelled in this window.
pub const SPEED_FLICK_MS: u64 = 100;
const SCROLL_STEPS: u64 = 15;
const SCROLL_INTERVAL_MS: u64 = 50;

pub fn flick_element(
    screen: &dyn Screen,
    element_id: &str,
    xoffset: i32,
    yoffset: i32,
    speed: i32,
) -> CommandResult<()> {
    let origin = resolve_element(screen, element_id)?.on_screen();
    let timing = FlickTiming::for_speed(speed);
    screen.swipe(origin, origin.offset(xoffset, yoffset)?, timing.total_ms())?;
    Ok(())
}

pub fn flick_speed(screen: &dyn Screen, xspeed: i32, yspeed: i32) -> CommandResult<()> {
    let (width, height) = screen.size()?;
    let origin = Point::new(width / 2, height / 2);
    let to = origin.offset(travel(xspeed)?, travel(yspeed)?)?;
    screen.swipe(origin, to, SPEED_FLICK_MS)?;
    Ok(())
}

/// Pixels covered in [`SPEED_FLICK_MS`] at `speed` pixels per second.
fn travel(speed: i32) -> CommandResult<i32> {
    let pixels = i64::from(speed) * SPEED_FLICK_MS as i64 / 1000;
    i32::try_from(pixels)
        .map_err(|_| CommandError::invalid_argument(format!("flick speed {speed} is out of range")))
}

/// Flicks `distance` pixels from `origin` in a named direction and returns
/// where the finger lifted.
pub fn flick_direction(
    screen: &dyn Screen,
    origin: Point,
    direction: &str,
    distance: i32,
    duration_ms: u64,
) -> CommandResult<Point> {
    let (dx, dy) = direction_from_name(direction)?.scale(distance)?;
    let to = origin.offset(dx, dy)?;
    let timing = FlickTiming::for_duration(duration_ms);
    screen.swipe(origin, to, timing.total_ms())?;
    Ok(to)
}

pub fn scroll(screen: &dyn Screen, origin: Point, xoffset: i32, yoffset: i32) -> CommandResult<()> {
    screen.swipe(
        origin,
        origin.offset(xoffset, yoffset)?,
        SCROLL_STEPS * SCROLL_INTERVAL_MS,
    )?;
    Ok(())
}

pub async fn long_press(screen: &dyn Screen, at: Point) -> CommandResult<()> {
    screen.motion(MotionAction::Down, at)?;
    tokio::time::sleep(Duration::from_millis(LONG_PRESS_MS)).await;
    screen.motion(MotionAction::Up, at)?;
    Ok(())
}

fn position(screen: &dyn Screen, target: &Target, last: Option<Point>) -> CommandResult<Point> {
    let bare = target.element.is_none() && (target.x.is_none() || target.y.is_none());
    match last {
        Some(at) if bare => Ok(at),
        _ => target.position(screen),
    }
}

/// Runs pointer chains tick by tick. `pointerCancel` lifts every finger
/// still down.
pub async fn perform(screen: &dyn Screen, chains: Vec<ActionChain>) -> CommandResult<()> {
    if let Some(chain) = chains.iter().find(|c| c.input_device != TOUCH_DEVICE) {
        return Err(CommandError::Unsupported(format!(
            "unrecognised input device: {}",
            chain.input_device
        )));
    }

    let mut pressed: Vec<Option<Point>> = vec![None; chains.len()];
    for tick in schedule(chains) {
        for (chain, action) in tick.actions {
            tracing::debug!(chain, ?action, "pointer action");
            match &action {
                PointerAction::PointerDown(target) => {
                    let at = position(screen, target, pressed[chain])?;
                    screen.motion(MotionAction::Down, at)?;
                    pressed[chain] = Some(at);
                }
                PointerAction::PointerMove(target) => {
                    let at = position(screen, target, pressed[chain])?;
                    screen.motion(MotionAction::Move, at)?;
                    if pressed[chain].is_some() {
                        pressed[chain] = Some(at);
                    }
                }
                PointerAction::PointerUp(target) => {
                    let at = position(screen, target, pressed[chain])?;
                    screen.motion(MotionAction::Up, at)?;
                    pressed[chain] = None;
                }
                PointerAction::Flick {
                    direction,
                    distance,
                    duration,
                    ..
                } => {
                    let target = action.target().unwrap_or_default();
                    let origin = position(screen, &target, pressed[chain])?;
                    flick_direction(screen, origin, direction, *distance, *duration)?;
                }
                PointerAction::PointerCancel => {
                    for finger in pressed.iter_mut() {
                        if let Some(at) = finger.take() {
                            screen.motion(MotionAction::Cancel, at)?;
                        }
                    }
                }
                PointerAction::Pause { .. } => {}
            }
        }
        if tick.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(tick.pause_ms)).await;
        }
    }
    Ok(())
}
