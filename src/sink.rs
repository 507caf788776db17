use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender};
use log::{debug, error, warn};
use serde_derive::{Deserialize, Serialize};

use crate::camera::FrameReport;
use crate::config::SinkConfig;
use crate::error::Error;
use crate::violation::Incident;

/// Receives the monitor output. Implementations must return promptly and
/// never fail the caller.
pub trait IncidentSink {
    fn report(&self, incident: Incident);

    /// Called once per processed frame, after its incidents.
    fn report_frame(&self, frame: FrameReport);
}

/// One unit of monitor output. Serialized with a `kind` tag next to the
/// payload fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkEvent {
    Incident(Incident),
    Frame(FrameReport),
}

impl SinkEvent {
    fn describe(&self) -> String {
        match self {
            SinkEvent::Incident(i) => format!("incident for track {}", i.track_id),
            SinkEvent::Frame(f) => format!("frame {:.3} of camera {}", f.timestamp, f.camera_id),
        }
    }
}

/// The actual destination behind a [`ChannelSink`], driven from its own
/// thread.
pub trait Deliver: Send {
    fn deliver(&mut self, event: &SinkEvent) -> Result<(), Error>;
}

/// Hands monitor output to a delivery thread through a bounded channel. A
/// send that cannot complete within the timeout drops the event.
pub struct ChannelSink {
    tx: Option<Sender<SinkEvent>>,
    send_timeout: Duration,
    dropped: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl ChannelSink {
    pub fn spawn<D: Deliver + 'static>(config: &SinkConfig, mut target: D) -> Result<Self, Error> {
        config.validate()?;

        let (tx, rx) = bounded::<SinkEvent>(config.capacity);

        let worker = std::thread::Builder::new()
            .name("incident-delivery".into())
            .spawn(move || {
                for event in rx.iter() {
                    match target.deliver(&event) {
                        Ok(()) => debug!("{} delivered", event.describe()),
                        Err(err) => error!("delivery failed for {}: {}", event.describe(), err),
                    }
                }
            })
            .map_err(|err| {
                Error::DeliveryError(format!("cannot start delivery thread: {}", err))
            })?;

        Ok(Self {
            tx: Some(tx),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            dropped: AtomicU64::new(0),
            worker: Some(worker),
        })
    }

    /// Events discarded because the channel stayed full or was closed.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits for queued events to be delivered. Fails when the delivery
    /// thread died on the way.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.close()
    }

    fn close(&mut self) -> Result<(), Error> {
        self.tx.take();

        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::DeliveryError("delivery thread panicked".into())),
            None => Ok(()),
        }
    }

    fn send(&self, event: SinkEvent) {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return,
        };

        match tx.send_timeout(event, self.send_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{} dropped: delivery queue full", event.describe());
            }
            Err(SendTimeoutError::Disconnected(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("{} dropped: delivery thread gone", event.describe());
            }
        }
    }
}

impl IncidentSink for ChannelSink {
    #[inline]
    fn report(&self, incident: Incident) {
        self.send(SinkEvent::Incident(incident));
    }

    #[inline]
    fn report_frame(&self, frame: FrameReport) {
        self.send(SinkEvent::Frame(frame));
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("{}", err);
        }
    }
}

/// Writes every event as one JSON line. Frame reports are skipped unless
/// enabled with [`JsonLinesWriter::with_frames`].
pub struct JsonLinesWriter<W: Write + Send> {
    out: W,
    frames: bool,
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: false }
    }

    pub fn with_frames(mut self, frames: bool) -> Self {
        self.frames = frames;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Deliver for JsonLinesWriter<W> {
    fn deliver(&mut self, event: &SinkEvent) -> Result<(), Error> {
        if matches!(event, SinkEvent::Frame(_)) && !self.frames {
            return Ok(());
        }

        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::violation::{IncidentExtra, IncidentKind};
    use chrono::Utc;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Deliver for Recorder {
        fn deliver(&mut self, event: &SinkEvent) -> Result<(), Error> {
            self.0.lock().unwrap().push(event.describe());
            Ok(())
        }
    }

    struct Failing;

    impl Deliver for Failing {
        fn deliver(&mut self, _: &SinkEvent) -> Result<(), Error> {
            Err(Error::DeliveryError("backend down".into()))
        }
    }

    struct Panicking;

    impl Deliver for Panicking {
        fn deliver(&mut self, _: &SinkEvent) -> Result<(), Error> {
            panic!("backend exploded");
        }
    }

    struct Gate {
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl Deliver for Gate {
        fn deliver(&mut self, _: &SinkEvent) -> Result<(), Error> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(())
        }
    }

    fn incident(track_id: u64) -> Incident {
        Incident {
            camera_id: 1,
            incident_type: IncidentKind::Speed,
            track_id,
            detected_class: "car".into(),
            speed_kmh: 80.0,
            speed_limit: 50.0,
            bbox: BBox::ltrb(0.0, 0.0, 10.0, 10.0),
            confidence: 0.9,
            timestamp: Utc::now(),
            extra_data: IncidentExtra { hits: 5, age: 0 },
        }
    }

    fn frame(timestamp: f64, incidents: Vec<Incident>) -> FrameReport {
        FrameReport {
            camera_id: 1,
            timestamp,
            tracks: vec![],
            annotations: vec![],
            incidents,
        }
    }

    #[test]
    fn delivers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = ChannelSink::spawn(&SinkConfig::default(), Recorder(seen.clone())).unwrap();
        for id in 1..=3 {
            sink.report(incident(id));
        }
        sink.report_frame(frame(0.5, vec![]));
        sink.shutdown().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "incident for track 1",
                "incident for track 2",
                "incident for track 3",
                "frame 0.500 of camera 1",
            ]
        );
    }

    #[test]
    fn delivery_errors_are_swallowed() {
        let sink = ChannelSink::spawn(&SinkConfig::default(), Failing).unwrap();
        sink.report(incident(1));
        sink.report_frame(frame(0.0, vec![]));
        assert_eq!(sink.dropped(), 0);
        assert!(sink.shutdown().is_ok());
    }

    #[test]
    fn dead_delivery_thread_surfaces_on_shutdown() {
        let sink = ChannelSink::spawn(&SinkConfig::default(), Panicking).unwrap();
        sink.report(incident(1));

        assert!(matches!(sink.shutdown(), Err(Error::DeliveryError(_))));
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();
        let target = Gate {
            started: started_tx,
            release: release_rx,
        };

        let config = SinkConfig {
            capacity: 1,
            send_timeout_ms: 20,
        };
        let sink = ChannelSink::spawn(&config, target).unwrap();

        // worker holds the first, the queue holds the second
        sink.report(incident(1));
        started_rx.recv().unwrap();
        sink.report(incident(2));
        sink.report_frame(frame(0.1, vec![]));
        sink.report(incident(3));

        assert_eq!(sink.dropped(), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        sink.shutdown().unwrap();
    }

    #[test]
    fn json_lines_writer_emits_one_line_per_incident() {
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.deliver(&SinkEvent::Incident(incident(1))).unwrap();
        writer.deliver(&SinkEvent::Frame(frame(0.1, vec![]))).unwrap();
        writer.deliver(&SinkEvent::Incident(incident(2))).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        let parsed: Incident = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.track_id, 2);
    }

    #[test]
    fn json_lines_writer_can_include_frames() {
        let mut writer = JsonLinesWriter::new(Vec::new()).with_frames(true);
        writer
            .deliver(&SinkEvent::Frame(frame(0.2, vec![incident(4)])))
            .unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["kind"], "frame");
        assert_eq!(value["incidents"][0]["track_id"], 4);

        let event: SinkEvent = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(event, SinkEvent::Frame(frame(0.2, vec![incident(4)])));
    }
}
