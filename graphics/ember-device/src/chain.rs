//! # Render Chain
//!
//! Singly linked list of draw and state commands, evaluated in order by
//! [`UiRenderDevice::evaluate_chain`](crate::UiRenderDevice::evaluate_chain).
//!
//! Nodes live in a generational arena so commands can be spliced in and out
//! by id without invalidating the ids of their neighbours.

use alloc::boxed::Box;
use core::fmt;

use ember_core::{ImmediateError, Mat4, MaterialId, Rect, SlotArena, SlotKey, StateParams};

use crate::draw_params::DrawParams;
use crate::mesh::MeshId;

// =============================================================================
// COMMANDS
// =============================================================================

/// Immediate-mode drawing callback
///
/// Runs with the scissor disabled and may change any render state; the
/// evaluator restores its own state afterwards. Returning an error aborts
/// the rest of the chain.
pub struct ImmediateCallback {
    callback: Box<dyn FnMut(&DrawParams) -> Result<(), ImmediateError> + Send>,
}

impl ImmediateCallback {
    /// Wrap a closure
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(&DrawParams) -> Result<(), ImmediateError> + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Run the callback
    pub fn call(&mut self, params: &DrawParams) -> Result<(), ImmediateError> {
        (self.callback)(params)
    }
}

impl fmt::Debug for ImmediateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ImmediateCallback")
    }
}

/// One entry of a render chain
#[derive(Debug)]
pub enum RenderChainCommand {
    /// Draw `index_count` indices of a mesh starting `index_offset` into it
    Draw {
        /// Mesh to draw
        mesh: MeshId,
        /// First index, relative to the mesh's index region
        index_offset: u32,
        /// Index count
        index_count: u32,
        /// Material and textures
        state: StateParams,
    },
    /// Run a callback
    Immediate(ImmediateCallback),
    /// Run a callback if its bounds are visible
    ImmediateCull {
        /// Bounds in points
        world_bound: Rect,
        /// Callback
        callback: ImmediateCallback,
    },
    /// Push a view transform and its clip rect
    PushView {
        /// View transform
        transform: Mat4,
        /// Clip rect in points
        clip: Rect,
    },
    /// Pop the view transform and its clip rect
    PopView,
    /// Push a clip rect
    PushScissor {
        /// Clip rect in points
        clip: Rect,
    },
    /// Pop a clip rect
    PopScissor,
    /// Redirect drawing into a temporary render texture
    PushRenderTexture,
    /// Release the current temporary render texture
    PopRenderTexture,
    /// Composite the current render texture into the previous target
    BlitToPreviousRt {
        /// Blit material, `None` for a plain copy
        material: Option<MaterialId>,
    },
    /// Push a default material
    PushDefaultMaterial {
        /// Material, `None` for the built-in one
        material: Option<MaterialId>,
    },
    /// Pop a default material
    PopDefaultMaterial,
}

impl RenderChainCommand {
    /// Draw command with default state
    pub fn draw(mesh: MeshId, index_offset: u32, index_count: u32) -> Self {
        Self::Draw {
            mesh,
            index_offset,
            index_count,
            state: StateParams::default(),
        }
    }

    /// Immediate command from a closure
    pub fn immediate<F>(callback: F) -> Self
    where
        F: FnMut(&DrawParams) -> Result<(), ImmediateError> + Send + 'static,
    {
        Self::Immediate(ImmediateCallback::new(callback))
    }

    /// Whether this is a draw
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. })
    }
}

// =============================================================================
// CHAIN
// =============================================================================

/// Identifies a command inside its chain
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(SlotKey);

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId({}v{})", self.0.index(), self.0.generation())
    }
}

#[derive(Debug)]
struct Node {
    command: RenderChainCommand,
    next: Option<CommandId>,
}

/// Ordered list of commands
#[derive(Debug, Default)]
pub struct RenderChain {
    nodes: SlotArena<Node>,
    head: Option<CommandId>,
    tail: Option<CommandId>,
}

impl RenderChain {
    /// Create an empty chain
    pub const fn new() -> Self {
        Self {
            nodes: SlotArena::new(),
            head: None,
            tail: None,
        }
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First command
    pub fn head(&self) -> Option<CommandId> {
        self.head
    }

    /// Command after `id`
    pub fn next(&self, id: CommandId) -> Option<CommandId> {
        self.nodes.get(id.0).and_then(|node| node.next)
    }

    /// Command behind `id`
    pub fn get(&self, id: CommandId) -> Option<&RenderChainCommand> {
        self.nodes.get(id.0).map(|node| &node.command)
    }

    /// Mutable command behind `id`
    pub fn get_mut(&mut self, id: CommandId) -> Option<&mut RenderChainCommand> {
        self.nodes.get_mut(id.0).map(|node| &mut node.command)
    }

    /// Append a command
    pub fn push_back(&mut self, command: RenderChainCommand) -> CommandId {
        let id = CommandId(self.nodes.insert(Node {
            command,
            next: None,
        }));
        match self.tail.and_then(|tail| self.nodes.get_mut(tail.0)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Prepend a command
    pub fn push_front(&mut self, command: RenderChainCommand) -> CommandId {
        let id = CommandId(self.nodes.insert(Node {
            command,
            next: self.head,
        }));
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
        id
    }

    /// Insert a command after `after`
    ///
    /// Returns `None` if `after` is not in the chain.
    pub fn insert_after(
        &mut self,
        after: CommandId,
        command: RenderChainCommand,
    ) -> Option<CommandId> {
        let next = self.nodes.get(after.0)?.next;
        let id = CommandId(self.nodes.insert(Node { command, next }));
        if let Some(node) = self.nodes.get_mut(after.0) {
            node.next = Some(id);
        }
        if self.tail == Some(after) {
            self.tail = Some(id);
        }
        Some(id)
    }

    /// Unlink and return a command
    pub fn remove(&mut self, id: CommandId) -> Option<RenderChainCommand> {
        if !self.nodes.contains(id.0) {
            return None;
        }

        // Find the predecessor
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == id {
                break;
            }
            prev = Some(current);
            cursor = self.next(current);
        }

        let node = self.nodes.remove(id.0)?;
        match prev.and_then(|p| self.nodes.get_mut(p.0)) {
            Some(prev_node) => prev_node.next = node.next,
            None => self.head = node.next,
        }
        if self.tail == Some(id) {
            self.tail = prev;
        }
        Some(node.command)
    }

    /// Remove every command
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    /// Iterate in chain order
    pub fn iter(&self) -> impl Iterator<Item = (CommandId, &RenderChainCommand)> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let id = cursor?;
            let node = self.nodes.get(id.0)?;
            cursor = node.next;
            Some((id, &node.command))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn order(chain: &RenderChain) -> Vec<CommandId> {
        chain.iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_push_and_insert() {
        let mut chain = RenderChain::new();
        let a = chain.push_back(RenderChainCommand::PopScissor);
        let c = chain.push_back(RenderChainCommand::PopView);
        let b = chain.insert_after(a, RenderChainCommand::PushRenderTexture).unwrap();
        let d = chain.insert_after(c, RenderChainCommand::PopRenderTexture).unwrap();
        let z = chain.push_front(RenderChainCommand::PopDefaultMaterial);
        assert_eq!(order(&chain), [z, a, b, c, d]);
        assert_eq!(chain.len(), 5);

        // Tail moved to `d`
        let e = chain.push_back(RenderChainCommand::PopScissor);
        assert_eq!(chain.next(d), Some(e));
    }

    #[test]
    fn test_remove_relinks() {
        let mut chain = RenderChain::new();
        let a = chain.push_back(RenderChainCommand::PopScissor);
        let b = chain.push_back(RenderChainCommand::PopView);
        let c = chain.push_back(RenderChainCommand::PopRenderTexture);

        assert!(matches!(chain.remove(b), Some(RenderChainCommand::PopView)));
        assert_eq!(order(&chain), [a, c]);
        assert!(chain.remove(b).is_none());

        chain.remove(c);
        let d = chain.push_back(RenderChainCommand::PopView);
        assert_eq!(order(&chain), [a, d]);

        chain.remove(a);
        assert_eq!(chain.head(), Some(d));
        chain.clear();
        assert!(chain.is_empty());
        assert_eq!(chain.head(), None);
    }

    #[test]
    fn test_immediate_callback_runs() {
        let mut command = RenderChainCommand::immediate(|params: &DrawParams| {
            if params.scissor_depth() == 1 {
                Ok(())
            } else {
                Err(ImmediateError::new("clipped"))
            }
        });
        let params = DrawParams::new(None, None);
        match &mut command {
            RenderChainCommand::Immediate(callback) => assert_eq!(callback.call(&params), Ok(())),
            _ => unreachable!(),
        }
        assert!(!command.is_draw());
    }
}
