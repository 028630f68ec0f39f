// model = "claude-opus-4-5"
// created = "2026-10-16"
// modified = "2026-10-16"
// driver = "Isaac Clayton"

//! A repair data provider that only keeps a log.

use std::cell::RefCell;
use std::rc::Rc;

use trellis::core::MissingRepairData;
use trellis::core::NoopRepairDataStore;
use trellis::core::RepairDataStore;
use trellis::core::RepairDataStoreProvider;
use trellis::core::delta;

/// Records every delta it is fed while not frozen.
///
/// The log is shared between clones of the handle, so a test can keep one
/// handle and give another to an edit manager.
#[derive(Clone, Debug, Default)]
pub struct MockRepairDataStoreProvider {
    pub applied: Rc<RefCell<Vec<delta::Root>>>,
    frozen: Rc<RefCell<bool>>,
}

impl MockRepairDataStoreProvider {
    pub fn applied_count(&self) -> usize {
        return self.applied.borrow().len();
    }

    pub fn is_frozen(&self) -> bool {
        return *self.frozen.borrow();
    }
}

impl RepairDataStoreProvider for MockRepairDataStoreProvider {
    fn freeze(&mut self) {
        *self.frozen.borrow_mut() = true;
    }

    fn apply_delta(&mut self, change: &delta::Root) {
        if !self.is_frozen() {
            self.applied.borrow_mut().push(change.clone());
        }
    }

    fn create_repair_data(&mut self) -> Box<dyn RepairDataStore> {
        return Box::new(NoopRepairDataStore { policy: MissingRepairData::Empty });
    }

    /// A clone starts recording into a fresh log.
    fn clone_provider(&self) -> Box<dyn RepairDataStoreProvider> {
        return Box::new(MockRepairDataStoreProvider::default());
    }
}
