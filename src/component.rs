//! Component tree.
//!
//! Components are the hardware model instances of a system. They form a tree
//! rooted at `/`, own the blocks created for them and carry an optional clock
//! binding that their subtree inherits. Models register reset hooks on their
//! component; `Engine::reset` runs them in registration order.

use std::fmt;

use crate::block::Block;
use crate::engine::Engine;
use crate::error::{KernelError, SimResult};
use crate::types::{BlockId, ClockId, ComponentId};

/// Hook run when the system is reset.
pub type ResetHook = Box<dyn FnMut(&mut Engine) -> SimResult<()> + Send>;

#[derive(Debug)]
struct ComponentNode {
    name: String,
    parent: Option<ComponentId>,
    children: Vec<ComponentId>,
    /// Explicit binding; `None` inherits from the parent.
    clock: Option<ClockId>,
    blocks: Vec<BlockId>,
}

/// Arena of components plus their reset hooks.
pub struct ComponentTree {
    nodes: Vec<ComponentNode>,
    reset_hooks: Vec<(ComponentId, ResetHook)>,
}

impl ComponentTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![ComponentNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                clock: None,
                blocks: Vec::new(),
            }],
            reset_hooks: Vec::new(),
        }
    }

    /// Number of components, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The tree always holds the root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: ComponentId) -> SimResult<&ComponentNode> {
        self.nodes.get(id.index()).ok_or(KernelError::UnknownId {
            kind: "component",
            index: id.index(),
        })
    }

    fn child(&self, parent: ComponentId, name: &str) -> Option<ComponentId> {
        self.nodes[parent.index()]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.index()].name == name)
    }

    fn path(&self, id: ComponentId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = &self.nodes[c.index()];
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    /// Clock of `id`, inherited from the closest bound ancestor.
    fn effective_clock(&self, id: ComponentId) -> Option<ClockId> {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = &self.nodes[c.index()];
            if node.clock.is_some() {
                return node.clock;
            }
            cursor = node.parent;
        }
        None
    }

    /// `id` and all its descendants, parents first.
    fn subtree(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            out.extend_from_slice(&self.nodes[out[i].index()].children);
            i += 1;
        }
        out
    }
}

impl fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTree")
            .field("nodes", &self.nodes)
            .field("reset_hooks", &self.reset_hooks.len())
            .finish()
    }
}

impl Engine {
    /// Creates a component named `name` under `parent`.
    pub fn new_component(&mut self, parent: ComponentId, name: &str) -> SimResult<ComponentId> {
        self.components.node(parent)?;
        if name.is_empty() || name.contains('/') {
            return Err(KernelError::InvalidName(name.to_string()));
        }
        if self.components.child(parent, name).is_some() {
            let parent_path = self.components.path(parent);
            return Err(KernelError::DuplicateComponent(join_path(&parent_path, name)));
        }

        let id = ComponentId::from_index(self.components.nodes.len());
        self.components.nodes.push(ComponentNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            clock: None,
            blocks: Vec::new(),
        });
        self.components.nodes[parent.index()].children.push(id);
        tracing::trace!(component = %id, path = %self.components.path(id), "new component");
        Ok(id)
    }

    /// Hierarchical path of a component, `/` for the root.
    pub fn component_path(&self, component: ComponentId) -> SimResult<String> {
        self.components.node(component)?;
        Ok(self.components.path(component))
    }

    /// Resolves a `/`-delimited path; the leading slash is optional.
    pub fn get_component(&self, path: &str) -> SimResult<ComponentId> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(ComponentId::ROOT, |current, part| {
                self.components
                    .child(current, part)
                    .ok_or_else(|| KernelError::UnknownComponent(path.to_string()))
            })
    }

    /// Number of components, root included.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Clock domain a component's new blocks are bound to.
    pub fn component_clock(&self, component: ComponentId) -> SimResult<Option<ClockId>> {
        self.components.node(component)?;
        Ok(self.components.effective_clock(component))
    }

    /// Binds `component` and every inheriting descendant to `clock`.
    ///
    /// Blocks already created are moved to the new domain with their pending
    /// clock events keeping the number of cycles left to wait.
    pub fn set_component_clock(
        &mut self,
        component: ComponentId,
        clock: Option<ClockId>,
    ) -> SimResult<()> {
        self.components.node(component)?;
        if let Some(c) = clock {
            self.clock(c)?;
        }
        self.components.nodes[component.index()].clock = clock;

        for id in self.components.subtree(component) {
            let effective = self.components.effective_clock(id);
            let blocks = self.components.nodes[id.index()].blocks.clone();
            for block in blocks {
                self.move_block_clock(block, effective);
            }
        }
        Ok(())
    }

    /// Creates a block owned by `component`, bound to its clock domain.
    pub fn new_block(&mut self, component: ComponentId, name: &str) -> SimResult<BlockId> {
        self.components.node(component)?;
        let clock = self.components.effective_clock(component);
        let id = BlockId::from_index(self.blocks.len());
        self.blocks.push(Block::new(name, component, clock));
        self.components.nodes[component.index()].blocks.push(id);
        if let Some(c) = clock {
            self.clocks[c.index()].blocks.push(id);
        }
        Ok(id)
    }

    /// Blocks owned by `component`.
    pub fn component_blocks(&self, component: ComponentId) -> SimResult<&[BlockId]> {
        Ok(&self.components.node(component)?.blocks)
    }

    /// Registers a hook run by [`reset`](Self::reset).
    pub fn on_reset<F>(&mut self, component: ComponentId, hook: F) -> SimResult<()>
    where
        F: FnMut(&mut Engine) -> SimResult<()> + Send + 'static,
    {
        self.components.node(component)?;
        self.components
            .reset_hooks
            .push((component, Box::new(hook)));
        Ok(())
    }

    /// Cancels every pending event, then runs the reset hooks in order.
    ///
    /// Time is not rewound.
    pub fn reset(&mut self) -> SimResult<()> {
        tracing::debug!(time = self.time(), "system reset");
        self.cancel_all();

        let mut hooks = std::mem::take(&mut self.components.reset_hooks);
        let mut result = Ok(());
        for (component, hook) in hooks.iter_mut() {
            if let Err(err) = hook(self) {
                tracing::error!(%component, error = %err, "reset hook failed");
                result = Err(err);
                break;
            }
        }
        // Hooks registered while resetting run from the next reset on.
        hooks.append(&mut self.components.reset_hooks);
        self.components.reset_hooks = hooks;
        result
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_paths_and_lookup() {
        let mut engine = Engine::new();
        let soc = engine.new_component(ComponentId::ROOT, "soc").unwrap();
        let uart = engine.new_component(soc, "uart0").unwrap();

        assert_eq!(engine.component_path(ComponentId::ROOT).unwrap(), "/");
        assert_eq!(engine.component_path(uart).unwrap(), "/soc/uart0");
        assert_eq!(engine.get_component("/soc/uart0").unwrap(), uart);
        assert_eq!(engine.get_component("soc").unwrap(), soc);
        assert_eq!(engine.get_component("/").unwrap(), ComponentId::ROOT);
        assert!(matches!(
            engine.get_component("/soc/spi"),
            Err(KernelError::UnknownComponent(_))
        ));
        assert_eq!(engine.component_count(), 3);
    }

    #[test]
    fn test_duplicate_component() {
        let mut engine = Engine::new();
        let soc = engine.new_component(ComponentId::ROOT, "soc").unwrap();
        engine.new_component(soc, "timer").unwrap();
        let err = engine.new_component(soc, "timer").unwrap_err();
        assert_eq!(err.to_string(), "duplicate component '/soc/timer'");
    }

    #[test]
    fn test_blocks_inherit_clock() {
        let mut engine = Engine::new();
        let fast = engine.new_clock("fast", 1_000_000_000);
        let soc = engine.new_component(ComponentId::ROOT, "soc").unwrap();
        let cpu = engine.new_component(soc, "cpu").unwrap();
        engine.set_component_clock(soc, Some(fast)).unwrap();

        let block = engine.new_block(cpu, "pipeline").unwrap();
        assert_eq!(engine.block(block).unwrap().clock(), Some(fast));
        assert_eq!(engine.component_clock(cpu).unwrap(), Some(fast));
        assert_eq!(engine.clock(fast).unwrap().blocks(), &[block]);
    }

    #[test]
    fn test_rebinding_moves_pending_cycles() {
        let mut engine = Engine::new();
        let slow = engine.new_clock("slow", 100_000_000);
        let fast = engine.new_clock("fast", 1_000_000_000);
        let cpu = engine.new_component(ComponentId::ROOT, "cpu").unwrap();
        engine.set_component_clock(cpu, Some(slow)).unwrap();
        let block = engine.new_block(cpu, "core").unwrap();
        let ev = engine.new_clock_event(block, |_, _| Ok(())).unwrap();
        engine.enqueue_cycles(ev, 4).unwrap();
        assert_eq!(engine.event_time(ev), Some(40_000));

        engine.step(10_000).unwrap();
        engine.set_component_clock(cpu, Some(fast)).unwrap();
        // Three cycles left, now at 1 ns each.
        assert_eq!(engine.event_time(ev), Some(13_000));
        assert!(engine.clock(slow).unwrap().blocks().is_empty());
    }

    #[test]
    fn test_reset_cancels_and_runs_hooks_in_order() {
        let mut engine = Engine::new();
        let dev = engine.new_component(ComponentId::ROOT, "dev").unwrap();
        let block = engine.new_block(dev, "b").unwrap();
        let stale = engine.new_event(block, |_, _| Ok(())).unwrap();
        engine.enqueue(stale, 100).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = Arc::clone(&order);
            engine
                .on_reset(dev, move |_| {
                    order.lock().push(tag);
                    Ok(())
                })
                .unwrap();
        }

        engine.reset().unwrap();
        assert!(!engine.is_enqueued(stale));
        assert!(engine.is_idle());
        assert_eq!(*order.lock(), vec![0, 1, 2]);

        engine.reset().unwrap();
        assert_eq!(order.lock().len(), 6);
    }
}
