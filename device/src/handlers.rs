use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use wire::capabilities::{PLATFORM_NAME, SCREEN_SIZE};
use wire::gesture::{ActionChain, ElementLocator, ROOT_ELEMENT, Rect, resolve_element};
use wire::{
    Capabilities, CommandError, CommandResult, CommandRouter, RequestContext, Response, handler,
};

use crate::screen::MotionAction;
use crate::state::DeviceState;
use crate::touch;

type State = Arc<DeviceState>;

const SESSION: &str = "/wd/hub/session/:sessionId";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionRequest {
    #[serde(default)]
    desired_capabilities: Option<Capabilities>,
}

#[derive(Deserialize)]
struct ElementRequest {
    element: String,
}

#[derive(Deserialize)]
struct PointRequest {
    x: i32,
    y: i32,
}

#[derive(Deserialize)]
struct ScrollRequest {
    #[serde(default)]
    element: Option<String>,
    xoffset: i32,
    yoffset: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlickRequest {
    Element {
        element: String,
        xoffset: i32,
        yoffset: i32,
        #[serde(default)]
        speed: i32,
    },
    Speed {
        xspeed: i32,
        yspeed: i32,
    },
}

pub fn routes() -> CommandRouter<DeviceState> {
    let s = |suffix: &str| format!("{SESSION}/{suffix}");
    CommandRouter::new()
        .get("/wd/hub/status", handler(status).alert_safe())
        .post("/wd/hub/session", handler(new_session))
        .get("/wd/hub/sessions", handler(list_sessions).alert_safe())
        .get(SESSION, handler(get_session).alert_safe())
        .delete(SESSION, handler(delete_session).alert_safe())
        .get(&s("alert_text"), handler(alert_text).alert_safe())
        .post(&s("accept_alert"), handler(accept_alert).alert_safe())
        .post(&s("dismiss_alert"), handler(dismiss_alert).alert_safe())
        .get(&s("element/:id/location"), handler(element_location))
        .get(&s("element/:id/location_in_view"), handler(element_location_in_view))
        .get(&s("element/:id/size"), handler(element_size))
        .get(&s("element/:id/rect"), handler(element_rect))
        .post(&s("touch/click"), handler(touch_click))
        .post(&s("touch/doubleclick"), handler(touch_double_click))
        .post(&s("touch/longclick"), handler(touch_long_click))
        .post(&s("touch/down"), handler(touch_down))
        .post(&s("touch/up"), handler(touch_up))
        .post(&s("touch/move"), handler(touch_move))
        .post(&s("touch/scroll"), handler(touch_scroll))
        .post(&s("touch/flick"), handler(touch_flick))
        .post(&s("actions"), handler(actions))
        .get(&s("screenshot"), handler(unsupported))
        .get(&s("source"), handler(unsupported))
        .post(&s("execute"), handler(unsupported))
        .post(&s("execute_async"), handler(unsupported))
        .get(&s("ime/available_engines"), handler(unsupported))
        .get(&s("ime/active_engine"), handler(unsupported))
        .post(&s("ime/activate"), handler(unsupported))
        .post(&s("log"), handler(unsupported))
}

async fn status(_: State, _: RequestContext) -> CommandResult {
    Ok(Response::success(
        None,
        json!({
            "build": { "version": env!("CARGO_PKG_VERSION"), "browserName": "droidwire" },
            "os": { "arch": std::env::consts::ARCH, "name": "Android" },
        }),
    ))
}

async fn new_session(state: State, ctx: RequestContext) -> CommandResult {
    let req: NewSessionRequest = ctx.parse()?;
    let desired = req.desired_capabilities.unwrap_or_default();
    let mut actual = desired.with(PLATFORM_NAME, json!("ANDROID"));
    match state.screen.size() {
        Ok((w, h)) => actual = actual.with(SCREEN_SIZE, json!(format!("{w}x{h}"))),
        Err(e) => tracing::warn!(error = %e, "screen size unavailable"),
    }
    let value = actual.to_value();
    let id = state.open(actual).await?;
    Ok(Response::success(Some(id), value))
}

async fn list_sessions(state: State, _: RequestContext) -> CommandResult {
    Ok(Response::success(None, state.sessions().await))
}

async fn get_session(state: State, ctx: RequestContext) -> CommandResult {
    let caps = state.require(&ctx).await?;
    Ok(Response::success(ctx.session_id_owned(), caps.to_value()))
}

async fn delete_session(state: State, ctx: RequestContext) -> CommandResult {
    state.close(&ctx).await?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn alert_text(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let text = state.screen.alert_text().ok_or(CommandError::NoAlertOpen)?;
    Ok(Response::success(ctx.session_id_owned(), text))
}

async fn accept_alert(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    if !state.screen.accept_alert()? {
        return Err(CommandError::NoAlertOpen);
    }
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn dismiss_alert(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    if !state.screen.dismiss_alert()? {
        return Err(CommandError::NoAlertOpen);
    }
    Ok(Response::success(ctx.session_id_owned(), ""))
}

fn element_bounds(state: &DeviceState, ctx: &RequestContext) -> CommandResult<Rect> {
    let id = ctx.element_id().unwrap_or_default();
    if id == ROOT_ELEMENT {
        let (w, h) = state.screen.size()?;
        return Ok(Rect::new(0, 0, w, h));
    }
    state
        .screen
        .element_bounds(id)
        .ok_or_else(|| CommandError::StaleElement(id.to_string()))
}

async fn element_location(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let bounds = element_bounds(&state, &ctx)?;
    Ok(Response::success(ctx.session_id_owned(), json!(bounds.location())))
}

async fn element_location_in_view(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let id = ctx.element_id().unwrap_or_default();
    let coords = resolve_element(&*state.screen, id)?;
    Ok(Response::success(ctx.session_id_owned(), json!(coords.in_viewport())))
}

async fn element_size(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let bounds = element_bounds(&state, &ctx)?;
    Ok(Response::success(
        ctx.session_id_owned(),
        json!({ "width": bounds.width, "height": bounds.height }),
    ))
}

async fn element_rect(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let bounds = element_bounds(&state, &ctx)?;
    Ok(Response::success(ctx.session_id_owned(), json!(bounds)))
}

async fn touch_click(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let req: ElementRequest = ctx.parse()?;
    let at = resolve_element(&*state.screen, &req.element)?.on_screen();
    state.screen.tap(at)?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn touch_double_click(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let req: ElementRequest = ctx.parse()?;
    let at = resolve_element(&*state.screen, &req.element)?.on_screen();
    state.screen.tap(at)?;
    state.screen.tap(at)?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn touch_long_click(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let req: ElementRequest = ctx.parse()?;
    let at = resolve_element(&*state.screen, &req.element)?.on_screen();
    touch::long_press(&*state.screen, at).await?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn touch_motion(state: State, ctx: RequestContext, action: MotionAction) -> CommandResult {
    state.require(&ctx).await?;
    let req: PointRequest = ctx.parse()?;
    state
        .screen
        .motion(action, wire::gesture::Point::new(req.x, req.y))?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn touch_down(state: State, ctx: RequestContext) -> CommandResult {
    touch_motion(state, ctx, MotionAction::Down).await
}

async fn touch_up(state: State, ctx: RequestContext) -> CommandResult {
    touch_motion(state, ctx, MotionAction::Up).await
}

async fn touch_move(state: State, ctx: RequestContext) -> CommandResult {
    touch_motion(state, ctx, MotionAction::Move).await
}

async fn touch_scroll(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let req: ScrollRequest = ctx.parse()?;
    let origin = match &req.element {
        Some(id) => resolve_element(&*state.screen, id)?.on_screen(),
        None => {
            let (w, h) = state.screen.size()?;
            wire::gesture::Point::new(w / 2, h / 2)
        }
    };
    touch::scroll(&*state.screen, origin, req.xoffset, req.yoffset)?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn touch_flick(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    match ctx.parse::<FlickRequest>()? {
        FlickRequest::Element {
            element,
            xoffset,
            yoffset,
            speed,
        } => touch::flick_element(&*state.screen, &element, xoffset, yoffset, speed)?,
        FlickRequest::Speed { xspeed, yspeed } => {
            touch::flick_speed(&*state.screen, xspeed, yspeed)?
        }
    }
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn actions(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    let chains = ActionChain::parse_payload(ctx.payload()?)?;
    tracing::info!(chains = chains.len(), "performing actions");
    touch::perform(&*state.screen, chains).await?;
    Ok(Response::success(ctx.session_id_owned(), ""))
}

async fn unsupported(state: State, ctx: RequestContext) -> CommandResult {
    state.require(&ctx).await?;
    Err(CommandError::Unsupported(format!(
        "{} {} is not supported on this device",
        ctx.verb(),
        ctx.path()
    )))
}
