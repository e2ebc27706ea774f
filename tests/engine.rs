mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aimacro::document::SharedMacro;
use aimacro::engine::{MacroSource, NoScreen, RunLoop, RunOutcome, ScreenCapture, Step, SystemClock, VarValue};
use aimacro::events::{ButtonAction, MouseSide, Point, SearchArea};
use aimacro::utils::imaging::encode_base64_png;
use common::{Harness, Input, ScriptedVision, SharedScreen, noise, paste};
use image::DynamicImage;

/// Screen that reorders the macro the first time it is captured, like a user
/// dragging lines while a search is running.
struct ReorderingScreen {
    screen: SharedScreen,
    source: Arc<SharedMacro>,
    moved: bool,
}

impl ScreenCapture for ReorderingScreen {
    fn capture(&mut self, area: &SearchArea) -> anyhow::Result<DynamicImage> {
        if !self.moved {
            self.moved = self.source.move_event(1, 0);
        }
        self.screen.capture(area)
    }
}

fn pattern_line(image: &str, area: &str, extra: &str) -> String {
    format!(
        "Search Pattern - Image: {image}, Search Area: {area}, Succeed Go To: found, \
         Fail Go To: Next, {extra}"
    )
}

#[test]
fn repeats_whole_macro_and_resets_timing_between_passes() {
    let h = Harness::new(&["Key pressed: 'a'", "Wait: 1.0s", "Checkpoint: end"]);
    let summary = RunLoop::new(h.engine(), 2).run();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.dispatches, 6);
    assert_eq!(summary.passes, 2);
    assert_eq!(summary.last, Step::new(3, None));
    assert_eq!(h.clock.elapsed(), Duration::from_secs(2));
    assert_eq!(
        h.input.taken(),
        vec![Input::Press("'a'".into()), Input::Press("'a'".into())]
    );
    assert!(!h.flag.is_running());
}

#[test]
fn recorded_timestamps_pace_input() {
    let h = Harness::new(&[
        "1.000 - Key pressed: 'a'",
        "1.500 - Key released: 'a'",
        "Mouse moved to: (5, 5)",
        "3.000 - Mouse Button.left pressed",
        "2.000 - Key pressed: 'b'",
    ]);
    let summary = RunLoop::new(h.engine(), 1).run();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    // 0.5s before the release, then 1.5s measured from the release across
    // the untimed move; going back in time does not sleep.
    assert_eq!(h.clock.elapsed(), Duration::from_secs(2));
    assert_eq!(
        h.input.taken(),
        vec![
            Input::Press("'a'".into()),
            Input::Release("'a'".into()),
            Input::Move(Point::new(5, 5)),
            Input::Button(MouseSide::Left, ButtonAction::Pressed, None),
            Input::Press("'b'".into()),
        ]
    );
}

#[test]
fn unknown_checkpoint_stops_the_run_in_place() {
    let h = Harness::new(&["Key pressed: 'a'", "Go To - Checkpoint: nowhere", "Key pressed: 'b'"]);
    let summary = RunLoop::new(h.engine(), 3).run();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.dispatches, 2);
    assert_eq!(summary.last.index, 1);
    assert_eq!(h.input.taken(), vec![Input::Press("'a'".into())]);
}

#[test]
fn goto_line_out_of_range_continues_with_next_line() {
    let h = Harness::new(&[
        "Go To - Line: 9999",
        "Checkpoint: a",
        "Checkpoint: b",
        "Checkpoint: c",
        "Checkpoint: d",
    ]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert!(h.flag.is_running());
}

#[test]
fn goto_line_jumps_even_when_element_changed() {
    let h = Harness::new(&[
        "Go To - Line: 2, Element: Wait: 9.0s",
        "Key pressed: 'x'",
        "Checkpoint: moved",
    ]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, Some(4.0))), Step::new(2, None));
    assert!(h.input.taken().is_empty());
}

#[test]
fn goto_checkpoint_lands_on_checkpoint_line() {
    let h = Harness::new(&["Checkpoint: top", "Go To - Target: top"]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(1, None)), Step::new(0, None));
}

#[test]
fn wait_interrupted_by_stop_keeps_position() {
    let h = Harness::new(&["Wait: 3.0s", "Key pressed: 'a'"]);
    h.clock.stop_flag_at(Duration::from_millis(1500), h.flag.clone());
    let mut engine = h.engine();

    let start = Step::new(0, Some(2.0));
    assert_eq!(engine.step(start), start);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(2));
    assert!(!h.flag.is_running());
}

#[test]
fn wait_observes_stop_in_real_time() {
    let h = Harness::new(&["Wait: 3.0s"]);
    let mut engine = h.engine().with_clock(Arc::new(SystemClock::new()));
    let flag = h.flag.clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(1500));
        flag.stop();
    });

    let started = Instant::now();
    let next = engine.step(Step::new(0, None));
    let took = started.elapsed();
    stopper.join().unwrap();

    assert_eq!(next, Step::new(0, None));
    assert!(took >= Duration::from_millis(1500), "returned after {took:?}");
    assert!(took < Duration::from_millis(2900), "returned after {took:?}");
}

#[test]
fn completed_wait_advances_with_its_own_timestamp() {
    let h = Harness::new(&["Wait: 2.7s"]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, Some(1.0))), Step::new(1, None));
    assert_eq!(h.clock.elapsed(), Duration::from_secs(2));
}

#[test]
fn malformed_line_is_skipped_without_touching_timing() {
    let h = Harness::new(&[
        "1.000 - Key pressed: 'a'",
        "Search Pattern - Image: abc, Search Area: Full Screen, Succeed Go To: Next, \
         Fail Go To: Next, Click: yes, Wait: 1.0s, Threshold: 0.7, Scene Change: False",
    ]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(1, Some(1.0))), Step::new(2, Some(1.0)));
    assert!(h.flag.is_running());
}

#[test]
fn unrecognized_line_is_skipped() {
    let h = Harness::new(&["Teleport to: mars"]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert!(h.flag.is_running());
}

#[test]
fn injector_failure_stops_the_run_in_place() {
    let mut h = Harness::new(&["0.500 - Key pressed: 'a'", "Key pressed: 'b'"]);
    h.input.fail = true;
    let summary = RunLoop::new(h.engine(), 1).run();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.dispatches, 1);
    assert_eq!(summary.last, Step::new(0, None));
}

#[test]
fn stopped_flag_skips_dispatch() {
    let h = Harness::new(&["Key pressed: 'a'"]);
    h.flag.stop();
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(0, None));
    assert!(h.input.taken().is_empty());
}

#[test]
fn if_branches_route_and_notify() {
    let h = Harness::new(&[
        "If score % 5, Succeed Go To: even, Fail Go To: Next, Wait: 0.0s, \
         Succeed Notification: ok, Fail Notification: bad",
        "Key pressed: 'n'",
        "Checkpoint: even",
    ]);
    h.variables.set("score", 10_i64);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(2, None));
    h.variables.set("score", 11_i64);
    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert_eq!(h.notifier.sent(), vec!["ok".to_string(), "bad".to_string()]);
}

#[test]
fn contains_ignores_case_and_whitespace() {
    let h = Harness::new(&[
        "If status Contains game over, Succeed Go To: done, Fail Go To: Next, Wait: 0.0s",
        "Key pressed: 'n'",
        "Checkpoint: done",
    ]);
    h.variables.set("status", "  GAME\nOVER! ");
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(2, None));
    h.variables.set("status", "still playing");
    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
}

#[test]
fn if_on_missing_variable_continues_silently() {
    let h = Harness::new(&[
        "If ghost == 1, Succeed Go To: nowhere, Fail Go To: nowhere, Wait: 0.0s, \
         Succeed Notification: ok, Fail Notification: bad",
    ]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert!(h.flag.is_running());
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn time_variables_refresh_before_conditions() {
    let h = Harness::new(&[
        "If time_year == 2024, Succeed Go To: Next, Fail Go To: nowhere, Wait: 0.0s",
    ]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert!(h.flag.is_running());
    assert_eq!(h.variables.get("time_hour"), Some(VarValue::Int(9)));
    assert_eq!(h.variables.get("time_weekday"), Some(VarValue::Int(0)));
}

#[test]
fn vision_answer_is_stored_and_upscaled_capture_is_sent() {
    let mut h = Harness::new(&[
        "Image AI - Provider: ChatGPT, Feature: vision, Area: {'start': (10, 10), 'end': (30, 20)}, \
         Variable: answer, Variable Content: ",
        "If answer Contains door open, Succeed Go To: Next, Fail Go To: nowhere, Wait: 0.0s",
    ]);
    h.vision = ScriptedVision::answering(&["The door open wide"]);
    let summary = RunLoop::new(h.engine(), 1).run();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(
        h.variables.get("answer"),
        Some(VarValue::Text("The door open wide".into()))
    );
    let calls = h.vision.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "What's in this image?");
    assert_eq!(calls[0].feature, "vision");
    assert_eq!((calls[0].width, calls[0].height), (100, 50));
}

#[test]
fn vision_failure_marker_stops_the_run_but_keeps_the_text() {
    let mut h = Harness::new(&[
        "Image AI - Provider: Azure, Feature: read, Area: {'start': (0, 0), 'end': (60, 60)}, \
         Variable: txt, Variable Content: ",
        "Key pressed: 'a'",
    ]);
    h.vision = ScriptedVision::answering(&["API request failed: 503"]);
    let summary = RunLoop::new(h.engine(), 1).run();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.last.index, 0);
    assert_eq!(
        h.variables.get("txt"),
        Some(VarValue::Text("API request failed: 503".into()))
    );
    assert!(h.input.taken().is_empty());
    assert_eq!(h.vision.calls()[0].prompt, "");
}

#[test]
fn pattern_found_clicks_center_and_takes_succeed_branch() {
    let template = noise(14, 10, 42);
    let mut frame = noise(320, 240, 7);
    paste(&mut frame, &template, 150, 130);
    let payload = encode_base64_png(&DynamicImage::ImageLuma8(template)).unwrap();

    let h = Harness::new(&[]);
    h.screen
        .inner
        .lock()
        .unwrap()
        .set_frame(DynamicImage::ImageLuma8(frame));
    h.source.push(pattern_line(
        &payload,
        "{'start': (100, 100), 'end': (300, 220)}",
        "Click: True, Wait: 2.0s, Threshold: 1.5, Scene Change: False, Succeed Notification: ping",
    ));
    h.source.push("Key pressed: 'z'");
    h.source.push("Checkpoint: found");
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(2, None));
    let center = Point::new(157, 135);
    assert_eq!(
        h.input.taken(),
        vec![
            Input::Button(MouseSide::Left, ButtonAction::Pressed, Some(center)),
            Input::Button(MouseSide::Left, ButtonAction::Released, Some(center)),
        ]
    );
    assert_eq!(h.notifier.sent(), vec!["ping".to_string()]);
}

#[test]
fn scene_change_replaces_stored_template_with_fresh_capture() {
    let absent = encode_base64_png(&DynamicImage::ImageLuma8(noise(14, 10, 9999))).unwrap();
    let area = "{'start': (100, 100), 'end': (130, 120)}";
    let h = Harness::new(&[]);
    h.source.push(pattern_line(
        &absent,
        area,
        "Click: False, Wait: 1.0s, Threshold: 0.95, Scene Change: True, Fail Notification: lost",
    ));
    h.source.push("Checkpoint: found");
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert_eq!(h.notifier.sent(), vec!["lost".to_string()]);
    // One search attempt, then the capture stored as the new template.
    assert_eq!(h.screen.capture_count(), 2);

    let rewritten = h.source.event(0).unwrap();
    assert!(rewritten.contains("Scene Change: True"));
    assert!(!rewritten.contains(&absent));

    // The refreshed template now matches its own area.
    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    assert_eq!(h.notifier.sent(), vec!["lost".to_string()]);
    assert_eq!(h.screen.capture_count(), 3);
}

#[test]
fn scene_change_skips_a_line_moved_during_the_search() {
    let absent = encode_base64_png(&DynamicImage::ImageLuma8(noise(14, 10, 9999))).unwrap();
    let other = encode_base64_png(&DynamicImage::ImageLuma8(noise(14, 10, 4242))).unwrap();
    let area = "{'start': (100, 100), 'end': (130, 120)}";
    let searched = pattern_line(
        &absent,
        area,
        "Click: False, Wait: 1.0s, Threshold: 0.95, Scene Change: True",
    );
    let neighbour = pattern_line(
        &other,
        area,
        "Click: False, Wait: 1.0s, Threshold: 0.95, Scene Change: False",
    );
    let h = Harness::new(&[]);
    h.source.push(searched.clone());
    h.source.push(neighbour.clone());
    let mut engine = h.engine_with_screen(Box::new(ReorderingScreen {
        screen: h.screen.clone(),
        source: h.source.clone(),
        moved: false,
    }));

    engine.step(Step::new(0, None));

    // Both lines survive untouched, in their new order.
    assert_eq!(h.source.events(), vec![neighbour, searched]);
    assert_eq!(h.screen.capture_count(), 2);
}

#[test]
fn full_screen_search_respects_its_budget_in_real_time() {
    let absent = encode_base64_png(&DynamicImage::ImageLuma8(noise(64, 64, 9999))).unwrap();
    let h = Harness::new(&[]);
    h.screen
        .inner
        .lock()
        .unwrap()
        .set_frame(DynamicImage::ImageLuma8(noise(1920, 1080, 7)));
    h.source.push(pattern_line(
        &absent,
        "Full Screen",
        "Click: False, Wait: 1.0s, Threshold: 0.7, Scene Change: False",
    ));
    h.source.push("Checkpoint: found");
    let mut engine = h.engine().with_clock(Arc::new(SystemClock::new()));

    let started = Instant::now();
    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    let took = started.elapsed();

    // Wait budget plus one retry interval at most.
    assert!(took < Duration::from_secs(2), "took {took:?}");
}

#[test]
fn json_parsing_error_marker_stops_the_run() {
    let mut h = Harness::new(&[
        "Image AI - Provider: Azure, Feature: read, Area: {'start': (0, 0), 'end': (60, 60)}, \
         Variable: txt, Variable Content: ",
        "Key pressed: 'a'",
    ]);
    h.vision = ScriptedVision::answering(&["JSON parsing error: expected value at line 1"]);
    let summary = RunLoop::new(h.engine(), 1).run();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert_eq!(summary.last.index, 0);
    assert_eq!(
        h.variables.get("txt"),
        Some(VarValue::Text("JSON parsing error: expected value at line 1".into()))
    );
    assert!(h.input.taken().is_empty());
}

#[test]
fn capture_failure_stops_pattern_and_vision_lines_in_place() {
    let template = encode_base64_png(&DynamicImage::ImageLuma8(noise(14, 10, 42))).unwrap();
    let lines = [
        pattern_line(
            &template,
            "Full Screen",
            "Click: True, Wait: 1.0s, Threshold: 0.7, Scene Change: False",
        ),
        "Image AI - Provider: ChatGPT, Feature: vision, Area: {'start': (10, 10), 'end': (30, 20)}, \
         Variable: answer, Variable Content: "
            .to_string(),
    ];

    for line in lines {
        let h = Harness::new(&[line.as_str(), "Key pressed: 'a'"]);
        let summary = RunLoop::new(h.engine_with_screen(Box::new(NoScreen)), 1).run();

        assert_eq!(summary.outcome, RunOutcome::Stopped, "{line}");
        assert_eq!(summary.last.index, 0, "{line}");
        assert!(h.input.taken().is_empty());
        assert!(h.vision.calls().is_empty());
        assert_eq!(h.variables.get("answer"), None);
    }
}

#[test]
fn status_channel_reports_current_line() {
    let h = Harness::new(&["Checkpoint: a", "Wait: 0.0s"]);
    let mut engine = h.engine();
    let status = engine.subscribe();

    engine.step(Step::new(1, None));
    let current = status.borrow().clone();
    assert_eq!(current.line, 1);
    assert_eq!(current.to_string(), "line: 1 - Wait: 0.0s");
}

#[test]
fn edits_during_a_run_are_seen_by_later_steps() {
    let h = Harness::new(&["Key pressed: 'a'", "Go To - Checkpoint: later"]);
    let mut engine = h.engine();

    assert_eq!(engine.step(Step::new(0, None)), Step::new(1, None));
    h.source.push("Checkpoint: later");
    assert_eq!(engine.step(Step::new(1, None)), Step::new(2, None));
}

#[tokio::test]
async fn async_observer_wakes_when_run_stops() {
    let h = Harness::new(&["Go To - Checkpoint: nowhere"]);
    let token = h.flag.token();
    let waiter = tokio::spawn(async move { token.cancelled().await });

    let summary = RunLoop::new(h.engine(), 1).run();
    waiter.await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
}
