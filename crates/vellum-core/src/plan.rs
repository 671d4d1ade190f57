//! The plan builder.
//!
//! A plan is an outline of a frame's work: nested groups of inherited
//! render state with vertex and blit leaves. The backend is never invoked
//! while a plan is being built, so construction may happen on any thread;
//! only consuming the plan with [`Plan::into_commands`] requires the GPU
//! claim.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::instr::{Instr, InstrTree, PassState, Target};
use crate::{
    BlendFactor, Buffer, Commands, Error, Gpu, Result, Shader, StateKey, TestFunc, Texture,
    Value, WriteMask,
};

/// A pass configured but not yet committed by `push_group`.
struct Pending {
    depth: u32,
    pass: PassState,
}

struct PlanState {
    tree: InstrTree,
    /// The committed group new instructions attach to. `None` either before
    /// the first push or after the root group was popped.
    cursor: Option<usize>,
    configuring: Option<Pending>,
}

/// An outline of operations, compiled into [`Commands`] by the backend when
/// consumed.
///
/// The builder is not safe for concurrent writers; clones share the same
/// underlying plan and a lock serializes access.
#[derive(Clone)]
pub struct Plan {
    inner: Arc<PlanShared>,
}

struct PlanShared {
    gpu: Gpu,
    state: Mutex<PlanState>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan").finish_non_exhaustive()
    }
}

impl Plan {
    pub fn new(gpu: &Gpu) -> Plan {
        Plan {
            inner: Arc::new(PlanShared {
                gpu: gpu.clone(),
                state: Mutex::new(PlanState {
                    tree: InstrTree::new(),
                    cursor: None,
                    configuring: None,
                }),
            }),
        }
    }

    pub fn gpu(&self) -> &Gpu {
        &self.inner.gpu
    }

    /// Enable configuration for the next child group. Must be paired with a
    /// following [`Plan::push_group`].
    pub fn begin_config(&self) {
        let mut state = self.inner.state.lock();
        if state.configuring.is_some() {
            error!("begin_config: a group is already being configured");
            return;
        }
        let depth = state
            .cursor
            .map(|cursor| state.tree.node(cursor).depth + 1)
            .unwrap_or(0);
        state.configuring = Some(Pending {
            depth,
            pass: PassState::new(),
        });
    }

    /// Add render targets to the group being configured. Each value is
    /// either a `Texture` or a `Tuple3` of texture, source blend index, and
    /// destination blend index. The whole call is rejected if any value is
    /// ill-formed.
    pub fn config_targets(&self, targets: &[Value]) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_targets: no group is being configured");
            return;
        };
        let mut checked = Vec::with_capacity(targets.len());
        for value in targets {
            match parse_target(value) {
                Some(target) => checked.push(target),
                None => {
                    error!("config_targets: value is not a texture or a (texture, src blend, dst blend) tuple");
                    return;
                }
            }
        }
        pending.pass.targets.extend(checked);
    }

    /// Set the shader for the group being configured.
    pub fn config_shader(&self, shader: &Shader) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_shader: no group is being configured");
            return;
        };
        pending.pass.shader = Some(shader.clone());
    }

    /// Set shader uniform values for the group being configured. Every
    /// value must be a `KeyVal`; the whole call is rejected otherwise.
    /// Setting a name again overwrites the value but keeps the name's
    /// first-insertion position in the bind order.
    pub fn config_uniforms(&self, keyvals: &[Value]) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_uniforms: no group is being configured");
            return;
        };
        if !keyvals.iter().all(|v| matches!(v, Value::KeyVal(..))) {
            error!("config_uniforms: every value must be a keyval");
            return;
        }
        for value in keyvals {
            if let Value::KeyVal(name, inner) = value {
                pending.pass.uniforms.insert(name.clone(), (**inner).clone());
            }
        }
    }

    /// Declare attribute names the group's draws will bind; each is
    /// validated against the in-scope shader when the plan is compiled.
    pub fn config_attributes(&self, names: &[&str]) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_attributes: no group is being configured");
            return;
        };
        for &name in names {
            if !pending.pass.attributes.iter().any(|n| n == name) {
                pending.pass.attributes.push(name.to_owned());
            }
        }
    }

    /// Override the viewport for the group being configured.
    pub fn config_dest(&self, x: i32, y: i32, width: i32, height: i32) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_dest: no group is being configured");
            return;
        };
        if width == 0 || height == 0 {
            error!("config_dest: width and height must be nonzero");
            return;
        }
        pending.pass.dest.set([x, y, width, height]);
    }

    /// Override the write mask for the group being configured.
    pub fn config_write_mask(&self, mask: WriteMask) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_write_mask: no group is being configured");
            return;
        };
        pending.pass.write_mask.set(mask);
    }

    /// Override the depth test function for the group being configured.
    pub fn config_depth_test_func(&self, func: TestFunc) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_depth_test_func: no group is being configured");
            return;
        };
        pending.pass.depth_func.set(func);
    }

    /// Set whether front faces use clockwise winding for the group being
    /// configured.
    pub fn config_clockwise_faces(&self, clockwise: bool) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_clockwise_faces: no group is being configured");
            return;
        };
        pending.pass.clockwise_faces.set(clockwise);
    }

    /// Set whether to cull back faces for the group being configured.
    pub fn config_backface_cull(&self, cull: bool) {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.configuring.as_mut() else {
            error!("config_backface_cull: no group is being configured");
            return;
        };
        pending.pass.backface_cull.set(cull);
    }

    /// Commit the configured group and make it the active one. Must be
    /// paired with a preceding [`Plan::begin_config`].
    pub fn push_group(&self) {
        let mut state = self.inner.state.lock();
        let Some(mut pending) = state.configuring.take() else {
            error!("push_group: no group is being configured");
            return;
        };

        match state.cursor {
            Some(parent_index) => {
                let parent_depth = state.tree.node(parent_index).depth;
                let parent = state.tree.pass(parent_index);

                pending.pass.fake = true;

                if pending.pass.targets.is_empty() {
                    pending.pass.targets = parent.targets.clone();
                } else {
                    pending.pass.fake = false;
                }

                if pending.pass.shader.is_none() {
                    pending.pass.shader = parent.shader.clone();
                } else {
                    pending.pass.fake = false;
                }

                if pending.pass.fake {
                    pending.depth = parent_depth;
                }

                pending.pass.dest.inherit(&parent.dest);
                pending.pass.write_mask.inherit(&parent.write_mask);
                pending.pass.depth_func.inherit(&parent.depth_func);
                pending.pass.clockwise_faces.inherit(&parent.clockwise_faces);
                pending.pass.backface_cull.inherit(&parent.backface_cull);

                let index =
                    state
                        .tree
                        .add_child(parent_index, pending.depth, Instr::Pass(pending.pass));
                state.cursor = Some(index);
            }
            None => {
                pending.pass.fake = false;

                if !pending.pass.write_mask.explicit {
                    pending.pass.write_mask.set(WriteMask::ALL);
                }
                if !pending.pass.depth_func.explicit {
                    pending.pass.depth_func.set(TestFunc::Lequal);
                }
                if !pending.pass.clockwise_faces.explicit {
                    pending.pass.clockwise_faces.set(false);
                }
                if !pending.pass.backface_cull.explicit {
                    pending.pass.backface_cull.set(true);
                }

                let index = state.tree.set_root(pending.depth, Instr::Pass(pending.pass));
                state.cursor = Some(index);
            }
        }
    }

    /// Configure and activate a child group in one call. Each pair sets the
    /// state named by its key; a pair whose value type does not match the
    /// key is logged and skipped.
    pub fn push_state<I>(&self, states: I)
    where
        I: IntoIterator<Item = (StateKey, Value)>,
    {
        if self.inner.state.lock().configuring.is_some() {
            error!("push_state: a group is already being configured");
            return;
        }

        self.begin_config();
        for (key, value) in states {
            match key {
                StateKey::Shader => match value {
                    Value::Shader(shader) => self.config_shader(&shader),
                    other => skip_pair(key, &other),
                },
                StateKey::Target => self.config_targets(std::slice::from_ref(&value)),
                StateKey::Uniform => self.config_uniforms(std::slice::from_ref(&value)),
                StateKey::Dest => match value {
                    Value::Rect([x, y, w, h]) => self.config_dest(x, y, w, h),
                    other => skip_pair(key, &other),
                },
                StateKey::WriteMask => match value {
                    Value::UInt(bits) => {
                        self.config_write_mask(WriteMask::from_bits_truncate(bits))
                    }
                    other => skip_pair(key, &other),
                },
                StateKey::DepthFunc => match value {
                    Value::Int(index) => match TestFunc::from_index(index) {
                        Some(func) => self.config_depth_test_func(func),
                        None => error!("push_state: {index} is not a depth test function"),
                    },
                    other => skip_pair(key, &other),
                },
                StateKey::ClockwiseFaces => match value {
                    Value::Bool(clockwise) => self.config_clockwise_faces(clockwise),
                    other => skip_pair(key, &other),
                },
                StateKey::BackfaceCull => match value {
                    Value::Bool(cull) => self.config_backface_cull(cull),
                    other => skip_pair(key, &other),
                },
            }
        }
        self.push_group();
    }

    /// Append buffers to be drawn under the active group, processed
    /// `instances` times.
    ///
    /// Walking up from the active group, a shader, a set write mask, and a
    /// set depth test function must be in scope. An explicitly set write
    /// mask that clears the depth bit satisfies the depth-function
    /// requirement as well, since a pure color pass tests no depth.
    pub fn append(&self, instances: u32, buffers: &[Buffer]) {
        let mut state = self.inner.state.lock();
        if state.configuring.is_some() {
            error!("append: a group is still being configured");
            return;
        }
        let Some(cursor) = state.cursor else {
            error!("append: no group has been pushed");
            return;
        };
        if instances == 0 {
            error!("append: instance count must be at least 1");
            return;
        }
        if buffers.is_empty() {
            error!("append: at least one buffer is required");
            return;
        }
        if !validate_append(&state.tree, cursor) {
            return;
        }
        let depth = state.tree.node(cursor).depth + 1;
        state.tree.add_child(
            cursor,
            depth,
            Instr::Vertices {
                buffers: buffers.to_vec(),
                instances,
            },
        );
    }

    /// Copy a texture to the active group's output.
    pub fn blit(&self, src: &Texture) {
        let mut state = self.inner.state.lock();
        if state.configuring.is_some() {
            error!("blit: a group is still being configured");
            return;
        }
        let Some(cursor) = state.cursor else {
            error!("blit: no group has been pushed");
            return;
        };
        let depth = state.tree.node(cursor).depth + 1;
        state
            .tree
            .add_child(cursor, depth, Instr::Blit { src: src.clone() });
    }

    /// Terminate the active group, restoring the state in effect before it
    /// was pushed.
    pub fn pop(&self) {
        self.pop_n(1);
    }

    /// Pop `n` groups. Popping past the root logs and stops.
    pub fn pop_n(&self, n: u32) {
        let mut state = self.inner.state.lock();
        if state.configuring.is_some() {
            error!("pop: a group is still being configured");
            return;
        }
        if state.cursor.is_none() {
            error!("pop: no group has been pushed");
            return;
        }
        for _ in 0..n {
            match state.cursor {
                Some(cursor) => state.cursor = state.tree.node(cursor).parent,
                None => {
                    error!("pop: no more groups to pop");
                    break;
                }
            }
        }
    }

    /// Consume the plan and compile it into backend instructions.
    ///
    /// The caller must hold the sole remaining reference; if clones exist
    /// elsewhere this logs and fails without touching the backend. The GPU
    /// claim is required.
    pub fn into_commands(self) -> Result<Commands> {
        self.consume(false)
    }

    /// Like [`Plan::into_commands`], but the resulting commands record
    /// human-readable driver-call logs at compile time and on each
    /// dispatch.
    pub fn into_debugging_commands(self) -> Result<Commands> {
        self.consume(true)
    }

    fn consume(self, debug: bool) -> Result<Commands> {
        {
            let state = self.inner.state.lock();
            if state.configuring.is_some() {
                error!("into_commands: a group is still being configured");
                return Err(Error::usage("a group is still being configured"));
            }
            if state.cursor.is_some() {
                error!("into_commands: every group must be popped before consuming the plan");
                return Err(Error::usage("plan still has unpopped groups"));
            }
        }

        let gpu = self.inner.gpu.clone();
        gpu.claim_guard("into_commands")?;

        let shared = Arc::try_unwrap(self.inner).map_err(|_| {
            error!("into_commands: plan still has references elsewhere, so it cannot be compiled");
            Error::usage("plan still has references elsewhere")
        })?;
        let tree = shared.state.into_inner().tree;

        if tree.is_empty() {
            error!("into_commands: plan is empty");
            return Err(Error::usage("plan is empty"));
        }

        let commands = Commands::new(&gpu, tree, debug);
        let compiled = gpu
            .backend()
            .compile(&gpu, commands.tree(), commands.debug_calls().map(|d| &d.compile));
        gpu.handle_error(compiled)?;

        Ok(commands)
    }
}

fn skip_pair(key: StateKey, value: &Value) {
    error!(
        "push_state: value of type {} does not match state key {key:?}; skipping pair",
        value.type_name()
    );
}

fn parse_target(value: &Value) -> Option<Target> {
    match value {
        Value::Texture(texture) => Some(Target {
            texture: texture.clone(),
            src_blend: BlendFactor::SrcAlpha,
            dst_blend: BlendFactor::OneMinusSrcAlpha,
        }),
        Value::Tuple3(tuple) => {
            let [texture, src, dst] = &**tuple;
            let Value::Texture(texture) = texture else {
                return None;
            };
            let (Value::Int(src), Value::Int(dst)) = (src, dst) else {
                return None;
            };
            Some(Target {
                texture: texture.clone(),
                src_blend: BlendFactor::from_index(*src)?,
                dst_blend: BlendFactor::from_index(*dst)?,
            })
        }
        _ => None,
    }
}

/// Walk ancestors checking that a shader, a write mask, and a depth test
/// function are in scope for a draw.
fn validate_append(tree: &InstrTree, cursor: usize) -> bool {
    let mut has_shader = false;
    let mut has_write_mask = false;
    let mut has_depth_func = false;

    for index in tree.ancestors(cursor) {
        let pass = tree.pass(index);

        if !has_shader {
            has_shader = pass.shader.is_some();
        }

        if !has_depth_func
            && !has_write_mask
            && pass.write_mask.explicit
            && !pass.write_mask.value.contains(WriteMask::DEPTH)
        {
            has_write_mask = true;
            has_depth_func = true;
        } else {
            if !has_write_mask {
                has_write_mask = pass.write_mask.explicit;
            }
            if !has_depth_func {
                has_depth_func = pass.depth_func.explicit;
            }
        }

        if has_shader && has_write_mask && has_depth_func {
            break;
        }
    }

    if !has_shader {
        error!("invalid append: needs a shader");
    }
    if !has_write_mask {
        error!("invalid append: needs a write mask");
    }
    if !has_depth_func {
        error!("invalid append: needs a depth test function");
    }

    has_shader && has_write_mask && has_depth_func
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Instr;
    use crate::testutil::stub_gpu;
    use crate::{DataSegment, Format, ScalarType};

    fn shader(gpu: &Gpu) -> Shader {
        Shader::for_source(gpu, "void main() {}", "void main() {}")
    }

    fn buffer(gpu: &Gpu) -> Buffer {
        Buffer::for_data(
            gpu,
            &[0u8; 60],
            &[DataSegment::new("vertexPosition", ScalarType::Float, 3)],
        )
        .unwrap()
    }

    fn tree_of(plan: Plan) -> InstrTree {
        plan.into_commands().unwrap().tree().clone()
    }

    #[test]
    fn cursor_returns_to_root_after_matching_pops() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);

        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.begin_config();
        plan.push_group();
        plan.pop();
        plan.begin_config();
        plan.push_group();
        plan.pop_n(2);

        // Fully popped: consuming succeeds.
        assert!(plan.into_commands().is_ok());
    }

    #[test]
    fn pop_past_root_stops() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        // One group exists; popping five times logs but does not wrap.
        plan.pop_n(5);
        assert!(plan.into_commands().is_ok());
    }

    #[test]
    fn root_group_defaults() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.begin_config();
        plan.config_shader(&shader(&gpu));
        plan.push_group();
        plan.pop();

        let tree = tree_of(plan);
        let root = tree.pass(0);
        assert!(!root.fake);
        assert!(root.write_mask.explicit);
        assert_eq!(root.write_mask.value, WriteMask::ALL);
        assert!(root.depth_func.explicit);
        assert_eq!(root.depth_func.value, TestFunc::Lequal);
        assert!(!root.clockwise_faces.value);
        assert!(root.backface_cull.value);
        assert!(!root.dest.explicit);
    }

    #[test]
    fn fake_pass_shares_parent_depth_and_state() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([
            (StateKey::Shader, Value::from(&shader(&gpu))),
            (StateKey::Dest, Value::rect(0, 0, 64, 64)),
        ]);
        // Neither targets nor shader: fake.
        plan.begin_config();
        plan.push_group();
        plan.pop_n(2);

        let tree = tree_of(plan);
        let child_index = tree.node(0).children[0];
        let child_node = tree.node(child_index);
        let child = tree.pass(child_index);

        assert!(child.fake);
        assert_eq!(child_node.depth, tree.node(0).depth);
        assert!(child.shader.is_some());
        // Inherited values are copied without claiming explicitness.
        assert_eq!(child.dest.value, [0, 0, 64, 64]);
        assert!(!child.dest.explicit);
        assert_eq!(child.write_mask.value, WriteMask::ALL);
        assert!(!child.write_mask.explicit);
    }

    #[test]
    fn new_shader_makes_pass_real() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.pop_n(2);

        let tree = tree_of(plan);
        let child_index = tree.node(0).children[0];
        assert!(!tree.pass(child_index).fake);
        assert_eq!(tree.node(child_index).depth, tree.node(0).depth + 1);
    }

    #[test]
    fn new_target_makes_pass_real() {
        let gpu = stub_gpu();
        let target = Texture::for_data(&gpu, None, 8, 8, Format::Rgba8, 1, 0).unwrap();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.push_state([(StateKey::Target, Value::from(&target))]);
        plan.pop_n(2);

        let tree = tree_of(plan);
        let child_index = tree.node(0).children[0];
        let child = tree.pass(child_index);
        assert!(!child.fake);
        assert_eq!(child.targets.len(), 1);
        assert_eq!(child.targets[0].src_blend, BlendFactor::SrcAlpha);
        assert_eq!(child.targets[0].dst_blend, BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn tuple_target_overrides_blends() {
        let gpu = stub_gpu();
        let target = Texture::for_data(&gpu, None, 8, 8, Format::Rgba8, 1, 0).unwrap();
        let plan = Plan::new(&gpu);
        plan.push_state([
            (StateKey::Shader, Value::from(&shader(&gpu))),
            (
                StateKey::Target,
                Value::tuple3(
                    Value::from(&target),
                    Value::from(BlendFactor::One),
                    Value::from(BlendFactor::Zero),
                ),
            ),
        ]);
        plan.pop();

        let tree = tree_of(plan);
        let root = tree.pass(0);
        assert_eq!(root.targets[0].src_blend, BlendFactor::One);
        assert_eq!(root.targets[0].dst_blend, BlendFactor::Zero);
    }

    #[test]
    fn bad_target_tuple_rejects_whole_call() {
        let gpu = stub_gpu();
        let target = Texture::for_data(&gpu, None, 8, 8, Format::Rgba8, 1, 0).unwrap();
        let plan = Plan::new(&gpu);
        plan.begin_config();
        plan.config_shader(&shader(&gpu));
        // Second value has an out-of-range blend index.
        plan.config_targets(&[
            Value::from(&target),
            Value::tuple3(Value::from(&target), Value::Int(99), Value::Int(1)),
        ]);
        plan.push_group();
        plan.pop();

        let tree = tree_of(plan);
        assert!(tree.pass(0).targets.is_empty());
    }

    #[test]
    fn uniform_replace_keeps_first_insertion_order() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.begin_config();
        plan.config_shader(&shader(&gpu));
        plan.config_uniforms(&[
            Value::keyval("mvp", Value::Mat4([0.0; 16])),
            Value::keyval("tint", Value::Vec4([1.0, 0.0, 0.0, 1.0])),
        ]);
        plan.config_uniforms(&[Value::keyval("mvp", Value::Mat4([1.0; 16]))]);
        plan.push_group();
        plan.pop();

        let tree = tree_of(plan);
        let root = tree.pass(0);
        let names: Vec<_> = root.uniforms.iter_ordered().map(|(n, _)| n.to_owned()).collect();
        assert_eq!(names, ["mvp", "tint"]);
        assert!(matches!(root.uniforms.get("mvp"), Some(Value::Mat4(m)) if m[0] == 1.0));
    }

    #[test]
    fn append_requires_shader_mask_and_depth_func() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        let buf = buffer(&gpu);

        // Root group with no shader anywhere in scope.
        plan.begin_config();
        plan.push_group();
        plan.append(1, std::slice::from_ref(&buf));
        plan.pop();

        let tree = tree_of(plan);
        assert!(tree.node(0).children.is_empty());
    }

    #[test]
    fn color_only_write_mask_satisfies_depth_func() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        let buf = buffer(&gpu);

        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        // Child group masks depth out explicitly; its write mask alone
        // satisfies both requirements.
        plan.push_state([(StateKey::WriteMask, Value::from(WriteMask::COLOR))]);
        plan.append(1, std::slice::from_ref(&buf));
        plan.pop_n(2);

        let tree = tree_of(plan);
        let child_index = tree.node(0).children[0];
        assert_eq!(tree.node(child_index).children.len(), 1);
    }

    #[test]
    fn append_zero_instances_is_rejected() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        let buf = buffer(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.append(0, std::slice::from_ref(&buf));
        plan.pop();

        let tree = tree_of(plan);
        assert!(tree.node(0).children.is_empty());
    }

    #[test]
    fn append_records_buffers_and_instances() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        let cube = buffer(&gpu);
        let offsets = buffer(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.append(8, &[cube.clone(), offsets.clone()]);
        plan.pop();

        let tree = tree_of(plan);
        let leaf = tree.node(tree.node(0).children[0]);
        match &leaf.instr {
            Instr::Vertices { buffers, instances } => {
                assert_eq!(*instances, 8);
                assert_eq!(buffers.len(), 2);
                assert!(Buffer::ptr_eq(&buffers[0], &cube));
            }
            _ => panic!("leaf is not a vertices op"),
        }
    }

    #[test]
    fn blit_appends_leaf() {
        let gpu = stub_gpu();
        let src = Texture::for_data(&gpu, None, 8, 8, Format::Rgba8, 1, 0).unwrap();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.blit(&src);
        plan.pop();

        let tree = tree_of(plan);
        let leaf = tree.node(tree.node(0).children[0]);
        assert!(matches!(&leaf.instr, Instr::Blit { .. }));
    }

    #[test]
    fn push_state_skips_ill_typed_pairs() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([
            (StateKey::Shader, Value::from(&shader(&gpu))),
            // Wrong type: skipped, the rest still applies.
            (StateKey::WriteMask, Value::Float(2.0)),
            (StateKey::ClockwiseFaces, Value::Bool(true)),
        ]);
        plan.pop();

        let tree = tree_of(plan);
        let root = tree.pass(0);
        assert!(root.clockwise_faces.value);
        // The skipped mask fell back to the root default.
        assert_eq!(root.write_mask.value, WriteMask::ALL);
    }

    #[test]
    fn consume_with_outstanding_reference_fails() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.pop();

        let extra = plan.clone();
        let err = plan.into_commands().unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        // With the clone dropped the remaining handle compiles fine.
        assert!(extra.into_commands().is_ok());
    }

    #[test]
    fn consume_with_unpopped_groups_fails() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        let err = plan.into_commands().unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn consume_empty_plan_fails() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        assert!(plan.into_commands().is_err());
    }

    #[test]
    fn begin_config_twice_is_rejected() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        plan.begin_config();
        plan.begin_config();
        plan.push_group();
        plan.pop();
        // Only one group was created.
        let tree = tree_of(plan);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn nested_msaa_pass_with_blit_keeps_outer_slot() {
        let gpu = stub_gpu();
        let cube = buffer(&gpu);
        let msaa_color =
            Texture::for_data(&gpu, None, 64, 64, Format::Rgba8, 1, 4).unwrap();
        let msaa_depth = Texture::depth(&gpu, 64, 64, 4).unwrap();

        let plan = Plan::new(&gpu);
        plan.push_state([
            (StateKey::Dest, Value::rect(0, 0, 64, 64)),
            (StateKey::Shader, Value::from(&shader(&gpu))),
            (StateKey::WriteMask, Value::from(WriteMask::COLOR)),
        ]);
        plan.push_state([
            (
                StateKey::Target,
                Value::tuple3(
                    Value::from(&msaa_color),
                    Value::from(BlendFactor::SrcAlpha),
                    Value::from(BlendFactor::OneMinusSrcAlpha),
                ),
            ),
            (StateKey::Target, Value::from(&msaa_depth)),
            (StateKey::Shader, Value::from(&shader(&gpu))),
        ]);
        plan.append(1, std::slice::from_ref(&cube));
        plan.pop();
        plan.blit(&msaa_color);
        plan.pop();

        let tree = tree_of(plan);
        let outer = tree.node(0);
        // The outer pass has no targets, so it draws to the externally
        // bound framebuffer; the inner pass took its own slot.
        assert!(tree.pass(0).targets.is_empty());
        let inner_index = outer.children[0];
        let inner = tree.pass(inner_index);
        assert!(!inner.fake);
        assert_eq!(tree.node(inner_index).depth, outer.depth + 1);
        assert_eq!(inner.targets.len(), 2);
        assert!(inner.targets.iter().all(|t| t.texture.msaa() > 0));
        // The blit sits under the outer pass, whose dest it will cover.
        let blit_index = outer.children[1];
        assert!(matches!(tree.node(blit_index).instr, Instr::Blit { .. }));
        assert_eq!(tree.pass(0).dest.value, [0, 0, 64, 64]);
        // Three levels plus the two scratch slots.
        assert_eq!(tree.max_height() + 2, 5);
    }

    #[test]
    fn nested_draw_raises_max_height() {
        let gpu = stub_gpu();
        let plan = Plan::new(&gpu);
        let buf = buffer(&gpu);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.push_state([(StateKey::Shader, Value::from(&shader(&gpu)))]);
        plan.append(1, std::slice::from_ref(&buf));
        plan.pop_n(2);

        let tree = tree_of(plan);
        assert_eq!(tree.max_height(), 3);
    }
}
