#[cfg(test)]
mod tests {
    use lode::{
        CaptureTracer, DebugTracer, Error, MemoryDatabase, Store, TimeoutTracer, Value, debug,
        install_tracer, remove_all_tracers, remove_tracer_type, tracers,
    };
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Duration,
    };

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    // The tracer registry is global, so everything runs in one test.
    #[test]
    fn tracers_observe_statements() {
        remove_all_tracers();

        let capture = Arc::new(CaptureTracer::new());
        install_tracer(capture.clone());
        let buffer = SharedBuffer::default();
        install_tracer(Arc::new(DebugTracer::to_writer(buffer.clone())));

        let database = MemoryDatabase::new();
        let store = Store::new(&database).unwrap();
        store
            .execute_raw("SELECT 1 WHERE x = ?", &[Value::Int(5)])
            .unwrap();

        assert_eq!(capture.statements(), vec!["SELECT 1 WHERE x = ?".to_string()]);
        assert_eq!(capture.entries()[0].1, vec![Value::Int(5)]);
        let log = buffer.contents();
        assert!(log.contains("EXECUTE: SELECT 1 WHERE x = ? (5)"), "got: {log}");
        assert!(log.contains("DONE"));

        store.commit().unwrap();
        assert!(buffer.contents().contains("COMMIT"));

        remove_tracer_type::<DebugTracer>();
        capture.clear();
        store.execute_raw("SELECT 2", &[]).unwrap();
        assert_eq!(capture.statements(), vec!["SELECT 2".to_string()]);
        assert_eq!(buffer.contents().matches("EXECUTE").count(), 1);

        // An exhausted time budget vetoes the statement before it runs.
        remove_all_tracers();
        install_tracer(Arc::new(TimeoutTracer::new(|| Duration::ZERO)));
        assert!(matches!(
            store.execute_raw("SELECT 3", &[]),
            Err(Error::Timeout(..)),
        ));
        remove_all_tracers();

        // A live budget propagates to the backend's statement timeout.
        install_tracer(Arc::new(TimeoutTracer::new(|| Duration::from_secs(30))));
        store.execute_raw("SELECT 4", &[]).unwrap();
        assert_eq!(
            database.handle().borrow().statement_timeout,
            Some(Duration::from_secs(30)),
        );
        remove_all_tracers();

        // debug() is a toggle around a DebugTracer.
        debug(true);
        assert_eq!(tracers().len(), 1);
        debug(false);
        assert!(tracers().is_empty());
    }
}
