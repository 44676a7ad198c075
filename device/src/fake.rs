//! In-memory screen for handler tests.

use std::collections::HashMap;
use std::sync::Mutex;

use wire::gesture::{ElementLocator, Point, Rect};

use crate::screen::{MotionAction, Screen, ScreenError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Tap(Point),
    Swipe(Point, Point, u64),
    Motion(MotionAction, Point),
    AcceptAlert,
    DismissAlert,
}

pub struct FakeScreen {
    pub elements: HashMap<String, Rect>,
    pub alert: Mutex<Option<String>>,
    events: Mutex<Vec<Event>>,
}

impl Default for FakeScreen {
    fn default() -> Self {
        Self {
            elements: HashMap::from([("btn".to_string(), Rect::new(10, 20, 100, 40))]),
            alert: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        }
    }
}

impl FakeScreen {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn close_alert(&self, event: Event) -> Result<bool, ScreenError> {
        let had_alert = self.alert.lock().unwrap().take().is_some();
        if had_alert {
            self.record(event);
        }
        Ok(had_alert)
    }
}

impl ElementLocator for FakeScreen {
    fn element_bounds(&self, element_id: &str) -> Option<Rect> {
        self.elements.get(element_id).copied()
    }
}

impl Screen for FakeScreen {
    fn tap(&self, at: Point) -> Result<(), ScreenError> {
        self.record(Event::Tap(at));
        Ok(())
    }

    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> Result<(), ScreenError> {
        self.record(Event::Swipe(from, to, duration_ms));
        Ok(())
    }

    fn motion(&self, action: MotionAction, at: Point) -> Result<(), ScreenError> {
        self.record(Event::Motion(action, at));
        Ok(())
    }

    fn size(&self) -> Result<(i32, i32), ScreenError> {
        Ok((1080, 1920))
    }

    fn alert_text(&self) -> Option<String> {
        self.alert.lock().unwrap().clone()
    }

    fn accept_alert(&self) -> Result<bool, ScreenError> {
        self.close_alert(Event::AcceptAlert)
    }

    fn dismiss_alert(&self) -> Result<bool, ScreenError> {
        self.close_alert(Event::DismissAlert)
    }
}
