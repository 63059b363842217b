//! Monitor state and key handling
//!
//! Holds the latest manager snapshot and a selection over its rows, and
//! turns key presses into manager calls.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::manager::{Bucket, ManagerSnapshot, TaskManager};
use crate::task::TaskId;

/// Main application state
#[derive(Debug)]
pub struct App {
    pub manager: TaskManager,
    /// Latest snapshot, refreshed every frame
    pub snapshot: ManagerSnapshot,
    /// Index into `snapshot.rows()`
    pub selected: usize,
    /// Whether the app is running
    pub running: bool,
    /// Last action error, cleared on the next key press
    pub message: Option<String>,
}

impl App {
    pub fn new(manager: TaskManager) -> Self {
        let snapshot = manager.snapshot();
        Self {
            manager,
            snapshot,
            selected: 0,
            running: true,
            message: None,
        }
    }

    /// Pull a fresh snapshot and keep the selection in range
    pub fn refresh(&mut self) {
        self.snapshot = self.manager.snapshot();
        let len = self.snapshot.len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Task under the cursor
    pub fn selected_task(&self) -> Option<(Bucket, TaskId)> {
        self.snapshot
            .rows()
            .get(self.selected)
            .map(|(bucket, task)| (*bucket, task.id))
    }

    /// First row to draw so the selection stays visible
    pub fn scroll_offset(&self, visible_height: usize) -> usize {
        if visible_height == 0 || self.selected < visible_height {
            0
        } else {
            self.selected + 1 - visible_height
        }
    }

    pub fn up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn down(&mut self) {
        if self.selected + 1 < self.snapshot.len() {
            self.selected += 1;
        }
    }

    // -------------------------------------------------------------------------
    // Keyboard Event Handling
    // -------------------------------------------------------------------------

    /// Handle keyboard event, returns true if event was consumed
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        self.message = None;

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.quit();
            return true;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.quit();
                true
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.up();
                true
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.down();
                true
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected = 0;
                true
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.selected = self.snapshot.len().saturating_sub(1);
                true
            }
            KeyCode::Char('x') => self.act_on_selected(|m, id| m.terminate(id)),
            KeyCode::Char('K') => self.act_on_selected(|m, id| m.kill(id)),
            KeyCode::Char('d') | KeyCode::Delete => self.act_on_selected(|m, id| m.cancel(id).map(|_| ())),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let max = self.manager.max_concurrent_tasks();
                self.manager.set_max_concurrent_tasks(max + 1);
                true
            }
            KeyCode::Char('-') => {
                let max = self.manager.max_concurrent_tasks();
                self.manager.set_max_concurrent_tasks(max.saturating_sub(1));
                true
            }
            _ => false,
        }
    }

    fn act_on_selected<F>(&mut self, action: F) -> bool
    where
        F: FnOnce(&TaskManager, TaskId) -> crate::error::Result<()>,
    {
        let Some((bucket, id)) = self.selected_task() else {
            return false;
        };
        if let Err(e) = action(&self.manager, id) {
            self.message = Some(format!("#{} ({}): {}", id, bucket, e));
        }
        self.refresh();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerSettings;
    use crate::models::MediaSource;
    use crate::program::ProgramRegistry;
    use crate::task::Task;
    use std::sync::Arc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app() -> App {
        let manager = TaskManager::new(Arc::new(ProgramRegistry::new()), ManagerSettings::default());
        App::new(manager)
    }

    fn queue_play(app: &App, title: &str) -> Arc<Task> {
        let task = Task::play(title, vec![MediaSource::new("https://example.com/a.mp4")]);
        app.manager.play(task).unwrap()
    }

    #[test]
    fn test_quit_keys() {
        let mut a = app();
        assert!(a.handle_key(key(KeyCode::Char('q'))));
        assert!(!a.running);

        let mut a = app();
        a.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!a.running);
    }

    #[test]
    fn test_selection_clamped() {
        let mut a = app();
        queue_play(&a, "one");
        queue_play(&a, "two");
        a.refresh();

        a.handle_key(key(KeyCode::Down));
        a.handle_key(key(KeyCode::Down));
        assert_eq!(a.selected, 1);
        a.handle_key(key(KeyCode::Up));
        a.handle_key(key(KeyCode::Up));
        assert_eq!(a.selected, 0);
    }

    #[test]
    fn test_cancel_selected_task() {
        let mut a = app();
        let task = queue_play(&a, "one");
        a.refresh();

        assert!(a.handle_key(key(KeyCode::Char('d'))));
        assert!(a.message.is_none());
        assert!(a.snapshot.is_empty());
        assert!(task.result.get().unwrap().is_err());
    }

    #[test]
    fn test_terminate_queued_task_reports_error() {
        let mut a = app();
        queue_play(&a, "one");
        a.refresh();

        a.handle_key(key(KeyCode::Char('x')));
        assert!(a.message.is_some());
    }

    #[test]
    fn test_adjust_limit() {
        let mut a = app();
        let start = a.manager.max_concurrent_tasks();
        a.handle_key(key(KeyCode::Char('+')));
        assert_eq!(a.manager.max_concurrent_tasks(), start + 1);
        a.handle_key(key(KeyCode::Char('-')));
        a.handle_key(key(KeyCode::Char('-')));
        assert_eq!(a.manager.max_concurrent_tasks(), start - 1);
    }

    #[test]
    fn test_scroll_offset() {
        let mut a = app();
        a.selected = 12;
        assert_eq!(a.scroll_offset(10), 3);
        assert_eq!(a.scroll_offset(20), 0);
        assert_eq!(a.scroll_offset(0), 0);
    }

    #[test]
    fn test_no_selection_actions_are_ignored() {
        let mut a = app();
        assert!(!a.handle_key(key(KeyCode::Char('K'))));
    }
}
