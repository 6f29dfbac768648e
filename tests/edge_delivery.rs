mod common;

use button_led_monitor::domain::model::{BoardTable, ChannelId, LineId};
use button_led_monitor::domain::ports::{
    Direction, Edge, EdgeCallback, EdgeNotifier, EventSourceId, HandlerOutcome, LineManager,
};
use button_led_monitor::{EdgeHub, EventDispatcher, LineRegistry, RecordingLauncher, SimulatedBoard};
use common::wait_until;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct HandlerTracker {
    in_flight: Mutex<HashMap<EventSourceId, usize>>,
    max_in_flight: Mutex<HashMap<EventSourceId, usize>>,
    started: AtomicUsize,
    finished: AtomicUsize,
}

fn callback(tracker: &Arc<HandlerTracker>, hold: Duration) -> EdgeCallback {
    let tracker = Arc::clone(tracker);
    Arc::new(move |source| {
        tracker.started.fetch_add(1, Ordering::SeqCst);
        {
            let mut in_flight = tracker.in_flight.lock().unwrap();
            let n = in_flight.entry(source).or_default();
            *n += 1;
            let mut max = tracker.max_in_flight.lock().unwrap();
            let m = max.entry(source).or_default();
            *m = (*m).max(*n);
        }
        std::thread::sleep(hold);
        *tracker.in_flight.lock().unwrap().get_mut(&source).unwrap() -= 1;
        tracker.finished.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::Handled
    })
}

fn input(board: &SimulatedBoard, line: u32) -> button_led_monitor::domain::ports::LineHandle {
    let handle = board.request_line(LineId(line), "test").unwrap();
    board.set_direction(handle, Direction::Input).unwrap();
    board.set_debounce(handle, Duration::ZERO).unwrap();
    handle
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delivery_is_serialized_per_source() {
    let board = Arc::new(SimulatedBoard::new());
    let hub = EdgeHub::new(Arc::clone(&board));
    let tracker = Arc::new(HandlerTracker::default());

    let mut sources = Vec::new();
    for line in [8, 7] {
        let source = hub.map_line_to_event_source(input(&board, line)).unwrap();
        hub.subscribe(source, Edge::Rising, callback(&tracker, Duration::from_millis(2)))
            .await
            .unwrap();
        sources.push(source);
    }

    for _ in 0..10 {
        board.press(LineId(8));
        board.press(LineId(7));
    }

    assert!(wait_until(|| tracker.finished.load(Ordering::SeqCst) == 20).await);
    let max = tracker.max_in_flight.lock().unwrap();
    for source in &sources {
        assert_eq!(max.get(source), Some(&1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsubscribe_waits_for_in_flight_handler() {
    let board = Arc::new(SimulatedBoard::new());
    let hub = EdgeHub::new(Arc::clone(&board));
    let tracker = Arc::new(HandlerTracker::default());

    let source = hub.map_line_to_event_source(input(&board, 12)).unwrap();
    let subscription = hub
        .subscribe(source, Edge::Rising, callback(&tracker, Duration::from_millis(100)))
        .await
        .unwrap();

    board.press(LineId(12));
    assert!(wait_until(|| tracker.started.load(Ordering::SeqCst) == 1).await);

    hub.unsubscribe(subscription).await;
    assert_eq!(tracker.finished.load(Ordering::SeqCst), 1);

    board.press(LineId(12));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tracker.started.load(Ordering::SeqCst), 1);

    // Unknown or repeated handles are ignored.
    hub.unsubscribe(subscription).await;
    assert_eq!(hub.active_subscriptions(), 0);
}

#[tokio::test]
async fn source_mapping_is_dropped_with_its_last_subscription() {
    let board = Arc::new(SimulatedBoard::new());
    let hub = EdgeHub::new(Arc::clone(&board));
    let tracker = Arc::new(HandlerTracker::default());

    let d = hub.map_line_to_event_source(input(&board, 8)).unwrap();
    let c = hub.map_line_to_event_source(input(&board, 7)).unwrap();
    let first = hub
        .subscribe(d, Edge::Rising, callback(&tracker, Duration::ZERO))
        .await
        .unwrap();
    let second = hub
        .subscribe(d, Edge::Rising, callback(&tracker, Duration::ZERO))
        .await
        .unwrap();
    let other = hub
        .subscribe(c, Edge::Rising, callback(&tracker, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(hub.mapped_sources(), 2);

    hub.unsubscribe(first).await;
    assert_eq!(hub.mapped_sources(), 2);
    hub.unsubscribe(second).await;
    assert_eq!(hub.mapped_sources(), 1);
    hub.unsubscribe(other).await;
    assert_eq!(hub.mapped_sources(), 0);
    assert_eq!(hub.active_subscriptions(), 0);

    assert!(hub
        .subscribe(d, Edge::Rising, callback(&tracker, Duration::ZERO))
        .await
        .is_err());
}

#[tokio::test]
async fn only_the_subscribed_edge_is_delivered() {
    let board = Arc::new(SimulatedBoard::new());
    let hub = EdgeHub::new(Arc::clone(&board));
    let tracker = Arc::new(HandlerTracker::default());

    let source = hub.map_line_to_event_source(input(&board, 16)).unwrap();
    hub.subscribe(source, Edge::Falling, callback(&tracker, Duration::ZERO))
        .await
        .unwrap();

    board.drive(LineId(16), true);
    board.drive(LineId(16), false);
    assert!(wait_until(|| tracker.finished.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tracker.started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn debounce_comes_from_the_line() {
    let board = Arc::new(SimulatedBoard::new());
    let hub = EdgeHub::new(Arc::clone(&board));
    let tracker = Arc::new(HandlerTracker::default());

    let handle = input(&board, 8);
    board.set_debounce(handle, Duration::from_millis(200)).unwrap();
    let source = hub.map_line_to_event_source(handle).unwrap();
    assert_eq!(hub.map_line_to_event_source(handle).unwrap(), source);
    hub.subscribe(source, Edge::Rising, callback(&tracker, Duration::ZERO))
        .await
        .unwrap();

    let t0 = Instant::now();
    board.press_at(LineId(8), t0);
    board.press_at(LineId(8), t0 + Duration::from_millis(150));
    board.press_at(LineId(8), t0 + Duration::from_millis(210));
    assert!(wait_until(|| tracker.finished.load(Ordering::SeqCst) == 2).await);
}

#[test]
fn concurrent_dispatch_on_one_channel_loses_no_presses() {
    let table = BoardTable::reference();
    let board = Arc::new(SimulatedBoard::new());
    let registry = Arc::new(LineRegistry::new(Arc::clone(&board)));
    for led in &table.leds {
        registry.acquire_output(led).unwrap();
    }
    for button in &table.buttons {
        registry.acquire_input(button).unwrap();
    }
    let launcher = Arc::new(RecordingLauncher::new());
    let dispatcher = Arc::new(EventDispatcher::new(&table, registry, Arc::clone(&launcher)).unwrap());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    dispatcher.dispatch(ChannelId(0));
                    dispatcher.dispatch(ChannelId((i % 3 + 1) as u8));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let route = dispatcher.route(ChannelId(0)).unwrap();
    assert_eq!(route.input.press_count(), 200);
    assert_eq!(launcher.launches().len(), 400);
    assert_eq!(
        board.written_levels(LineId(21)).len() + board.written_levels(LineId(26)).len(),
        400
    );
}
