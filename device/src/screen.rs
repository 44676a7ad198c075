use jni::objects::{GlobalRef, JIntArray, JObject, JString, JValue};
use jni::{JNIEnv, JavaVM};
use wire::CommandError;
use wire::gesture::{ElementLocator, Point, Rect};

/// `MotionEvent` action codes understood by the injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    Down,
    Up,
    Move,
    Cancel,
}

impl MotionAction {
    pub fn code(self) -> i32 {
        match self {
            MotionAction::Down => 0,
            MotionAction::Up => 1,
            MotionAction::Move => 2,
            MotionAction::Cancel => 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ScreenError(String);

impl ScreenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ScreenError> for CommandError {
    fn from(err: ScreenError) -> Self {
        CommandError::Failure(err.0)
    }
}

/// The device surface handlers drive. Geometry lookups come from
/// [`ElementLocator`].
pub trait Screen: ElementLocator + Send + Sync {
    fn tap(&self, at: Point) -> Result<(), ScreenError>;
    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> Result<(), ScreenError>;
    fn motion(&self, action: MotionAction, at: Point) -> Result<(), ScreenError>;
    fn size(&self) -> Result<(i32, i32), ScreenError>;
    fn alert_text(&self) -> Option<String>;
    fn accept_alert(&self) -> Result<bool, ScreenError>;
    fn dismiss_alert(&self) -> Result<bool, ScreenError>;
}

/// Forwards to a `com.droidwire.Injector` instance living in the app process.
pub struct JniScreen {
    jvm: JavaVM,
    injector: GlobalRef,
}

impl JniScreen {
    pub fn new(jvm: JavaVM, injector: GlobalRef) -> Self {
        Self { jvm, injector }
    }

    fn with_env<T>(
        &self,
        f: impl FnOnce(&mut JNIEnv, &JObject) -> Result<T, ScreenError>,
    ) -> Result<T, ScreenError> {
        let mut env = self
            .jvm
            .attach_current_thread()
            .map_err(|e| ScreenError::new(format!("attach_current_thread failed: {e}")))?;
        f(&mut env, self.injector.as_obj())
    }

    fn call_void(&self, method: &str, sig: &str, args: &[JValue]) -> Result<(), ScreenError> {
        self.with_env(|env, obj| {
            env.call_method(obj, method, sig, args)
                .map_err(|e| call_error(env, method, e))?;
            Ok(())
        })
    }

    fn call_bool(&self, method: &str) -> Result<bool, ScreenError> {
        self.with_env(|env, obj| {
            env.call_method(obj, method, "()Z", &[])
                .map_err(|e| call_error(env, method, e))?
                .z()
                .map_err(|e| ScreenError::new(format!("{method} result failed: {e}")))
        })
    }

    fn call_ints(&self, method: &str, sig: &str, args: &[JValue]) -> Result<Option<Vec<i32>>, ScreenError> {
        self.with_env(|env, obj| {
            let array: JIntArray = env
                .call_method(obj, method, sig, args)
                .map_err(|e| call_error(env, method, e))?
                .l()
                .map_err(|e| ScreenError::new(format!("{method} result failed: {e}")))?
                .into();
            if array.is_null() {
                return Ok(None);
            }
            let len = env
                .get_array_length(&array)
                .map_err(|e| ScreenError::new(format!("{method} array length failed: {e}")))?;
            let mut buf = vec![0; len as usize];
            env.get_int_array_region(&array, 0, &mut buf)
                .map_err(|e| ScreenError::new(format!("{method} array read failed: {e}")))?;
            Ok(Some(buf))
        })
    }
}

impl ElementLocator for JniScreen {
    fn element_bounds(&self, element_id: &str) -> Option<Rect> {
        let result = self.with_env(|env, obj| {
            let id = env
                .new_string(element_id)
                .map_err(|e| ScreenError::new(format!("new_string failed: {e}")))?;
            let array: JIntArray = env
                .call_method(
                    obj,
                    "elementBounds",
                    "(Ljava/lang/String;)[I",
                    &[JValue::Object(&id)],
                )
                .map_err(|e| call_error(env, "elementBounds", e))?
                .l()
                .map_err(|e| ScreenError::new(format!("elementBounds result failed: {e}")))?
                .into();
            if array.is_null() {
                return Ok(None);
            }
            let mut buf = [0; 4];
            env.get_int_array_region(&array, 0, &mut buf)
                .map_err(|e| ScreenError::new(format!("elementBounds read failed: {e}")))?;
            Ok(Some(Rect::new(buf[0], buf[1], buf[2], buf[3])))
        });
        match result {
            Ok(bounds) => bounds,
            Err(e) => {
                tracing::warn!(element_id, error = %e, "element lookup failed");
                None
            }
        }
    }
}

impl Screen for JniScreen {
    fn tap(&self, at: Point) -> Result<(), ScreenError> {
        self.call_void(
            "injectTap",
            "(FF)V",
            &[JValue::Float(at.x as f32), JValue::Float(at.y as f32)],
        )
    }

    fn swipe(&self, from: Point, to: Point, duration_ms: u64) -> Result<(), ScreenError> {
        self.call_void(
            "injectSwipe",
            "(FFFFJ)V",
            &[
                JValue::Float(from.x as f32),
                JValue::Float(from.y as f32),
                JValue::Float(to.x as f32),
                JValue::Float(to.y as f32),
                JValue::Long(duration_ms as i64),
            ],
        )
    }

    fn motion(&self, action: MotionAction, at: Point) -> Result<(), ScreenError> {
        self.call_void(
            "injectMotion",
            "(IFF)V",
            &[
                JValue::Int(action.code()),
                JValue::Float(at.x as f32),
                JValue::Float(at.y as f32),
            ],
        )
    }

    fn size(&self) -> Result<(i32, i32), ScreenError> {
        match self.call_ints("screenSize", "()[I", &[])? {
            Some(v) if v.len() >= 2 => Ok((v[0], v[1])),
            _ => Err(ScreenError::new("screenSize returned no dimensions")),
        }
    }

    fn alert_text(&self) -> Option<String> {
        let result = self.with_env(|env, obj| {
            let text = env
                .call_method(obj, "alertText", "()Ljava/lang/String;", &[])
                .map_err(|e| call_error(env, "alertText", e))?
                .l()
                .map_err(|e| ScreenError::new(format!("alertText result failed: {e}")))?;
            if text.is_null() {
                return Ok(None);
            }
            let text: JString = text.into();
            let text: String = env
                .get_string(&text)
                .map_err(|e| ScreenError::new(format!("alertText decode failed: {e}")))?
                .into();
            Ok(Some(text))
        });
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "alert lookup failed");
            None
        })
    }

    fn accept_alert(&self) -> Result<bool, ScreenError> {
        self.call_bool("acceptAlert")
    }

    fn dismiss_alert(&self) -> Result<bool, ScreenError> {
        self.call_bool("dismissAlert")
    }
}

fn call_error(env: &mut JNIEnv, method: &str, err: jni::errors::Error) -> ScreenError {
    match exception_message(env) {
        Some(msg) => ScreenError::new(format!("{method} call failed: {msg}")),
        None => ScreenError::new(format!("{method} call failed: {err}")),
    }
}

pub(crate) fn exception_message(env: &mut JNIEnv) -> Option<String> {
    if !env.exception_check().unwrap_or(false) {
        return None;
    }
    let exc = env.exception_occurred().ok()?;
    env.exception_clear().ok();
    Some(format_exception(env, &exc))
}

fn format_exception(env: &mut JNIEnv, exc: &JObject) -> String {
    // Throwable.toString() keeps the class name and message, enough for an
    // error envelope.
    let mut describe = || -> Option<String> {
        let text = env
            .call_method(exc, "toString", "()Ljava/lang/String;", &[])
            .ok()?
            .l()
            .ok()?;
        let text: JString = text.into();
        env.get_string(&text).ok().map(|s| s.into())
    };
    describe().unwrap_or_else(|| "<unprintable exception>".into())
}
