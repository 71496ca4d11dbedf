/*!
The virtualized execution state carried through code emission.

Instead of emitting code eagerly, nodes that manipulate state record their
manipulation in a [`Trace`]: a virtual offset of the current position,
pending register writes, an optional concrete backtrack target, and what is
known about characters already loaded. Postponing the work means a failing
path never pays for it, and jumping to a known backtrack label beats popping
an unknown one off the stack.

Code generated under a non-trivial trace is specialized to that trace, so
the same node can be emitted several times. When a node cannot keep the
virtualization going (choices and loops, or when the flush budget runs
out), [`Trace::flush`] materializes the virtual state: it emits the
deferred register actions together with the code to undo them on backtrack,
advances the real position, and resumes the successor with a trivial trace.
*/

use rustc_hash::FxHashSet;

use crate::codegen::{Label, MacroAssembler};
use crate::compiler::Compiler;
use crate::emit;
use crate::nodes::NodeId;
use crate::quickcheck::QuickCheckDetails;

/// What is known about a fact at code-generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriBool {
    True,
    False,
    Unknown,
}

/// A register manipulation whose emission has been postponed.
#[derive(Clone, Copy)]
pub(crate) enum DeferredAction {
    SetRegister { reg: usize, value: i32 },
    IncrementRegister { reg: usize },
    /// Stores `current_position + cp_offset`; `cp_offset` is the trace's
    /// virtual offset at the time the action was recorded.
    StorePosition { reg: usize, is_capture: bool, cp_offset: i32 },
    ClearCaptures { from: usize, to: usize },
}

impl DeferredAction {
    fn mentions(&self, reg: usize) -> bool {
        match self {
            DeferredAction::SetRegister { reg: r, .. }
            | DeferredAction::IncrementRegister { reg: r }
            | DeferredAction::StorePosition { reg: r, .. } => *r == reg,
            DeferredAction::ClearCaptures { from, to } => (*from..=*to).contains(&reg),
        }
    }

    fn max_register(&self) -> usize {
        match self {
            DeferredAction::SetRegister { reg, .. }
            | DeferredAction::IncrementRegister { reg }
            | DeferredAction::StorePosition { reg, .. } => *reg,
            DeferredAction::ClearCaptures { to, .. } => *to,
        }
    }
}

#[derive(Clone)]
pub(crate) struct Trace {
    cp_offset: i32,
    /// Deferred actions in chronological order; the newest is last.
    actions: Vec<DeferredAction>,
    backtrack: Option<Label>,
    stop_node: Option<NodeId>,
    loop_label: Option<Label>,
    characters_preloaded: usize,
    bound_checked_up_to: i32,
    quick_check_performed: QuickCheckDetails,
    at_start: TriBool,
    flush_budget: i32,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            cp_offset: 0,
            actions: Vec::new(),
            backtrack: None,
            stop_node: None,
            loop_label: None,
            characters_preloaded: 0,
            bound_checked_up_to: 0,
            quick_check_performed: QuickCheckDetails::new(0),
            at_start: TriBool::Unknown,
            flush_budget: 100,
        }
    }

    /// A trivial trace puts no demands on the code that is generated under
    /// it; such code can be reused as the node's generic version.
    pub fn is_trivial(&self) -> bool {
        self.backtrack.is_none()
            && self.actions.is_empty()
            && self.cp_offset == 0
            && self.characters_preloaded == 0
            && self.bound_checked_up_to == 0
            && self.quick_check_performed.characters() == 0
            && self.at_start == TriBool::Unknown
    }

    pub fn cp_offset(&self) -> i32 {
        self.cp_offset
    }

    pub fn actions_is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn add_action(&mut self, action: DeferredAction) {
        self.actions.push(action);
    }

    pub fn backtrack(&self) -> Option<Label> {
        self.backtrack
    }

    pub fn set_backtrack(&mut self, label: Label) {
        self.backtrack = Some(label);
    }

    pub fn stop_node(&self) -> Option<NodeId> {
        self.stop_node
    }

    pub fn set_stop_node(&mut self, node: NodeId) {
        self.stop_node = Some(node);
    }

    pub fn loop_label(&self) -> Option<Label> {
        self.loop_label
    }

    pub fn set_loop_label(&mut self, label: Label) {
        self.loop_label = Some(label);
    }

    pub fn characters_preloaded(&self) -> usize {
        self.characters_preloaded
    }

    pub fn set_characters_preloaded(&mut self, count: usize) {
        self.characters_preloaded = count;
    }

    pub fn bound_checked_up_to(&self) -> i32 {
        self.bound_checked_up_to
    }

    pub fn set_bound_checked_up_to(&mut self, to: i32) {
        self.bound_checked_up_to = to;
    }

    pub fn at_start(&self) -> TriBool {
        self.at_start
    }

    pub fn set_at_start(&mut self, at_start: TriBool) {
        self.at_start = at_start;
    }

    pub fn flush_budget(&self) -> i32 {
        self.flush_budget
    }

    pub fn set_flush_budget(&mut self, budget: i32) {
        self.flush_budget = budget;
    }

    pub fn quick_check_performed(&self) -> &QuickCheckDetails {
        &self.quick_check_performed
    }

    pub fn set_quick_check_performed(&mut self, details: &QuickCheckDetails) {
        self.quick_check_performed = details.clone();
    }

    pub fn clear_quick_check_performed(&mut self) {
        self.quick_check_performed = QuickCheckDetails::new(0);
    }

    /// Forgets that a character is in the current-character register.
    pub fn invalidate_current_character(&mut self) {
        self.characters_preloaded = 0;
    }

    /// Moves the virtual position forward (or backward) by `by` code
    /// units, adjusting everything that was relative to it.
    pub fn advance_current_position(&mut self, by: i32, compiler: &mut Compiler) {
        // There is no way to use a previously loaded character at a new
        // offset, so the preload is lost.
        self.characters_preloaded = 0;
        self.quick_check_performed.advance(by);
        self.cp_offset += by;
        if self.cp_offset > crate::codegen::MAX_CP_OFFSET {
            compiler.set_reg_exp_too_big();
            self.cp_offset = 0;
        }
        self.bound_checked_up_to = 0.max(self.bound_checked_up_to - by);
    }

    /// True if any deferred action touches `reg`. Guarded registers must
    /// not have deferred state when the guard is emitted.
    pub fn mentions_reg(&self, reg: usize) -> bool {
        self.actions.iter().any(|a| a.mentions(reg))
    }

    /// If the most recent deferred action on `reg` is a position store,
    /// returns the stored offset.
    pub fn stored_position(&self, reg: usize) -> Option<i32> {
        for action in self.actions.iter().rev() {
            if action.mentions(reg) {
                return match action {
                    DeferredAction::StorePosition { cp_offset, .. } => Some(*cp_offset),
                    _ => None,
                };
            }
        }
        None
    }

    fn find_affected_registers(&self, affected: &mut FxHashSet<usize>) -> Option<usize> {
        let mut max_register = None;
        for action in &self.actions {
            match action {
                DeferredAction::ClearCaptures { from, to } => {
                    affected.extend(*from..=*to);
                }
                _ => {
                    affected.insert(action.max_register());
                }
            }
            max_register = max_register.max(Some(action.max_register()));
        }
        max_register
    }

    fn perform_deferred_actions(
        &self,
        masm: &mut dyn MacroAssembler,
        max_register: usize,
        affected: &FxHashSet<usize>,
        registers_to_pop: &mut FxHashSet<usize>,
        registers_to_clear: &mut FxHashSet<usize>,
    ) {
        // The "+1" avoids a push limit of zero when the slack is one.
        let push_limit = (masm.stack_limit_slack() + 1) / 2;
        let mut pushes = 0;

        #[derive(PartialEq)]
        enum Undo {
            Ignore,
            Restore,
            Clear,
        }

        for reg in 0..=max_register {
            if !affected.contains(&reg) {
                continue;
            }
            // Scan the actions newest-first. The effect to perform is the
            // newest store (or the accumulated increments); the undo needed
            // on backtrack is inferred from the oldest action, which is the
            // one that clobbered the register's previous contents.
            let mut undo = Undo::Ignore;
            let mut value: i32 = 0;
            let mut absolute = false;
            let mut clear = false;
            let mut store_position: Option<i32> = None;
            for action in self.actions.iter().rev() {
                if !action.mentions(reg) {
                    continue;
                }
                match action {
                    DeferredAction::SetRegister { value: v, .. } => {
                        if !absolute {
                            value += *v;
                            absolute = true;
                        }
                        // A set is only used for loop counters, which can
                        // hold a live value from an enclosing loop, so it
                        // must be restored.
                        undo = Undo::Restore;
                        debug_assert!(store_position.is_none());
                        debug_assert!(!clear);
                    }
                    DeferredAction::IncrementRegister { .. } => {
                        if !absolute {
                            value += 1;
                        }
                        debug_assert!(store_position.is_none());
                        debug_assert!(!clear);
                        undo = Undo::Restore;
                    }
                    DeferredAction::StorePosition { is_capture, cp_offset, .. } => {
                        if !clear && store_position.is_none() {
                            store_position = Some(*cp_offset);
                        }
                        if reg <= 1 {
                            // Capture zero is always written again on
                            // success, so there is nothing to undo.
                            undo = Undo::Ignore;
                        } else if *is_capture {
                            // Stores and clears alternate for captures.
                            undo = Undo::Clear;
                        } else {
                            undo = Undo::Restore;
                        }
                        debug_assert!(!absolute);
                        debug_assert_eq!(value, 0);
                    }
                    DeferredAction::ClearCaptures { .. } => {
                        // Scanning in reverse order: a clear below an
                        // already-found store is historic and ignored.
                        if store_position.is_none() {
                            clear = true;
                        }
                        undo = Undo::Restore;
                        debug_assert!(!absolute);
                        debug_assert_eq!(value, 0);
                    }
                }
            }
            // Prepare the undo (push what will be popped on backtrack).
            if undo == Undo::Restore {
                pushes += 1;
                let check_stack_limit = pushes == push_limit;
                if check_stack_limit {
                    pushes = 0;
                }
                masm.push_register(reg, check_stack_limit);
                registers_to_pop.insert(reg);
            } else if undo == Undo::Clear {
                registers_to_clear.insert(reg);
            }
            // Perform the chronologically last action (or the accumulated
            // increment) for the register.
            if let Some(cp_offset) = store_position {
                masm.write_current_position_to_register(reg, cp_offset);
            } else if clear {
                masm.clear_registers(reg, reg);
            } else if absolute {
                masm.set_register(reg, value);
            } else if value != 0 {
                masm.advance_register(reg, value);
            }
        }
    }

    fn restore_affected_registers(
        masm: &mut dyn MacroAssembler,
        max_register: usize,
        registers_to_pop: &FxHashSet<usize>,
        registers_to_clear: &FxHashSet<usize>,
    ) {
        // Restore in descending register order, matching the push order of
        // the deferred-action emission.
        let mut reg = max_register as isize;
        while reg >= 0 {
            if registers_to_pop.contains(&(reg as usize)) {
                masm.pop_register(reg as usize);
            } else if registers_to_clear.contains(&(reg as usize)) {
                let clear_to = reg as usize;
                while reg > 0 && registers_to_clear.contains(&((reg - 1) as usize)) {
                    reg -= 1;
                }
                masm.clear_registers(reg as usize, clear_to);
            }
            reg -= 1;
        }
    }

    /// Materializes the virtual state: emits the deferred actions along
    /// with a backtrack landing pad that undoes them, advances the real
    /// position, and generates `successor` under a trivial trace.
    pub fn flush(
        &self,
        compiler: &mut Compiler,
        masm: &mut dyn MacroAssembler,
        successor: NodeId,
    ) {
        debug_assert!(!self.is_trivial());

        if self.actions.is_empty() && self.backtrack.is_none() {
            // Just some deferred position advances to fix, and possibly
            // knowledge gained through a quick check to forget.
            if self.cp_offset != 0 {
                masm.advance_current_position(self.cp_offset);
            }
            emit::emit(compiler, masm, successor, &Trace::new());
            return;
        }

        let mut affected = FxHashSet::default();

        if self.backtrack.is_some() {
            // A concrete backtrack location is set up by choice nodes and
            // implies a deferred save of the current position.
            masm.push_current_position();
        }

        let max_register = self.find_affected_registers(&mut affected);
        let mut registers_to_pop = FxHashSet::default();
        let mut registers_to_clear = FxHashSet::default();
        if let Some(max_register) = max_register {
            self.perform_deferred_actions(
                masm,
                max_register,
                &affected,
                &mut registers_to_pop,
                &mut registers_to_clear,
            );
        }
        if self.cp_offset != 0 {
            masm.advance_current_position(self.cp_offset);
        }

        // Generate the successor with a trivial state.
        let undo = masm.create_label();
        masm.push_backtrack(undo);
        if compiler.keep_recursing() {
            emit::emit(compiler, masm, successor, &Trace::new());
        } else {
            let label = compiler.node_label(masm, successor);
            compiler.add_work(successor);
            masm.go_to(Some(label));
        }

        // On backtrack the state is restored before moving on.
        masm.bind(undo);
        if let Some(max_register) = max_register {
            Self::restore_affected_registers(
                masm,
                max_register,
                &registers_to_pop,
                &registers_to_clear,
            );
        }
        if self.backtrack.is_none() {
            masm.backtrack();
        } else {
            masm.pop_current_position();
            masm.go_to(self.backtrack);
        }
    }
}
