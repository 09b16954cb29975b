// Links every feature crate so its `inventory::submit!` factory is visible
// to `ModuleCatalog::discover()`. New modules get a line here.
#![allow(unused_imports)]

use task_events as _;
