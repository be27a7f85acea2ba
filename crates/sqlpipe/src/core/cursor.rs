//! Forward-only row cursor fed by a driver task.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::schema::CursorColumn;
use crate::core::value::Row;
use crate::error::Result;

/// Rows buffered between a driver task and the pipe-file writer.
pub const CURSOR_BUFFER: usize = 1024;

/// Lazy forward-only iterator over a result set.
///
/// The driver decodes rows on its own task (or blocking thread) and sends
/// them over a bounded channel. Dropping the cursor closes the channel, so
/// the driver stops at its next send.
pub struct RowCursor {
    columns: Vec<CursorColumn>,
    rows: mpsc::Receiver<Result<Row>>,
    task: Option<JoinHandle<()>>,
}

impl RowCursor {
    /// Wrap an existing receiver.
    pub fn new(columns: Vec<CursorColumn>, rows: mpsc::Receiver<Result<Row>>) -> Self {
        Self {
            columns,
            rows,
            task: None,
        }
    }

    /// Spawn `producer` on the runtime and wire its sender to a new cursor.
    pub fn spawn<F, Fut>(columns: Vec<CursorColumn>, producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Result<Row>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CURSOR_BUFFER);
        let task = tokio::spawn(producer(tx));
        Self {
            columns,
            rows: rx,
            task: Some(task),
        }
    }

    /// Wrap a receiver fed by an already running task, which is aborted
    /// when the cursor is dropped.
    pub fn with_task(
        columns: Vec<CursorColumn>,
        rows: mpsc::Receiver<Result<Row>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            columns,
            rows,
            task: Some(task),
        }
    }

    /// Build a cursor over rows already in memory.
    pub fn from_rows(columns: Vec<CursorColumn>, rows: Vec<Row>) -> Self {
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for row in rows {
            // Capacity covers every row
            let _ = tx.try_send(Ok(row));
        }
        Self::new(columns, rx)
    }

    /// Result-set column metadata.
    pub fn columns(&self) -> &[CursorColumn] {
        &self.columns
    }

    /// Next row, or `None` when the result set is exhausted.
    pub async fn next(&mut self) -> Option<Result<Row>> {
        self.rows.recv().await
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.rows.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
