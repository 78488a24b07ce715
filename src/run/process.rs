// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use std::cell::RefCell;
use std::f64::consts::{FRAC_PI_2, PI};
use std::rc::Rc;

use log::trace;

use crate::data::{
    Action, Bullet, Change, DirectionKind, ElementPath, Evaluation, Expression,
    ExpressionContext, Fire, Horizontal, Step, Value, Vertical,
};
use crate::run::runner::{BulletState, FireContext, RunError, Runner, Shared};
use crate::run::table::{resolve_ref, Parameters};

/// Wrap an angle into `(-π, π]`.
fn normalize_direction(mut direction: f64) -> f64 {
    if !direction.is_finite() {
        return direction;
    }
    while direction > PI {
        direction -= 2. * PI;
    }
    while direction <= -PI {
        direction += 2. * PI;
    }
    direction
}

/// A timed linear modifier.
///
/// While `ticks < until` the delta accumulates into the modified value; on
/// the tick where `ticks == until` the target is written directly, so the
/// value lands exactly where the command computed it.
#[derive(Debug, Clone, Copy)]
struct Ramp {
    until: i64,
    delta: f64,
    target: f64,
}

impl Ramp {
    fn idle() -> Self {
        Ramp {
            until: -1,
            delta: 0.,
            target: 0.,
        }
    }

    fn apply(&self, ticks: i64, value: &mut f64) {
        if ticks < self.until {
            *value += self.delta;
        } else if ticks == self.until {
            *value = self.target;
        }
    }
}

/// Build the ramp for a change running over `term` ticks.
fn linear_ramp(kind: Change, value: f64, current: f64, term: i64, until: i64) -> Ramp {
    let target = kind.modify(value, current, term as f64);
    let delta = match kind {
        Change::Absolute | Change::Relative => (target - current) / term as f64,
        // For `sequence` the value itself is the per-tick delta.
        Change::Sequence => value,
    };
    Ramp {
        until,
        delta,
        target,
    }
}

/// Access to one axis of an `accel` element.
trait AccelAxis {
    fn kind(&self) -> Change;
    fn change(&self) -> &Expression;
    fn path(&self) -> &ElementPath;
}

impl AccelAxis for Horizontal {
    fn kind(&self) -> Change {
        self.kind
    }

    fn change(&self) -> &Expression {
        &self.change
    }

    fn path(&self) -> &ElementPath {
        &self.path
    }
}

impl AccelAxis for Vertical {
    fn kind(&self) -> Change {
        self.kind
    }

    fn change(&self) -> &Expression {
        &self.change
    }

    fn path(&self) -> &ElementPath {
        &self.path
    }
}

fn axis_ramp<A>(
    axis: Option<&A>,
    current: f64,
    term: i64,
    until: i64,
    ctx: &EvalContext,
) -> Result<Ramp, RunError>
where
    A: AccelAxis,
{
    let axis = match axis {
        Some(axis) => axis,
        // An absent axis holds its current value.
        None => {
            return Ok(Ramp {
                until,
                delta: 0.,
                target: current,
            })
        },
    };

    let value = eval(axis.change(), axis.path(), ctx)?.value;
    Ok(linear_ramp(axis.kind(), value, current, term, until))
}

/// Variable bindings for one expression evaluation.
struct EvalContext<'c, 'a> {
    params: &'c Parameters,
    bullet: &'c BulletState,
    shared: &'c Shared<'a>,
}

impl<'c, 'a> EvalContext<'c, 'a> {
    fn new(params: &'c Parameters, bullet: &'c BulletState, shared: &'c Shared<'a>) -> Self {
        EvalContext {
            params,
            bullet,
            shared,
        }
    }
}

impl ExpressionContext for EvalContext<'_, '_> {
    fn get(&self, name: &str) -> Option<Value> {
        self.params.get(name)
    }

    fn rand(&self) -> Value {
        self.shared.rand()
    }

    fn rank(&self) -> Value {
        self.shared.rank
    }

    fn direction(&self) -> Value {
        // BulletML-convention degrees: 0 points down the screen.
        self.bullet.direction.to_degrees() + 90.
    }

    fn speed(&self) -> Value {
        self.bullet.speed
    }
}

fn eval(
    expr: &Expression,
    path: &ElementPath,
    ctx: &EvalContext,
) -> Result<Evaluation, RunError> {
    expr.eval(ctx).map_err(|source| {
        RunError::Expression {
            path: path.clone(),
            source,
        }
    })
}

/// One stack entry: an action body and its execution cursor.
pub(crate) struct Frame<'a> {
    action: &'a Action,
    cursor: usize,
    repeat_index: i64,
    repeat: Option<RepeatState<'a>>,
    params: Rc<Parameters>,
}

impl<'a> Frame<'a> {
    fn new(action: &'a Action, params: Rc<Parameters>) -> Self {
        Frame {
            action,
            cursor: 0,
            repeat_index: 0,
            repeat: None,
            params,
        }
    }
}

/// State of the repeat command a frame is currently parked on.
struct RepeatState<'a> {
    times: i64,
    /// The resolved body. Kept across iterations only when resolution was
    /// deterministic; otherwise the reference's parameters are re-evaluated
    /// every iteration.
    resolved: Option<(&'a Action, Rc<Parameters>)>,
    deterministic: bool,
}

/// What a dispatched command asks the drain loop to do.
enum Flow<'a> {
    /// The command completed; run the next one.
    Continue,
    /// A new frame goes on top of the stack.
    Push(Frame<'a>),
    /// Stop draining for this tick.
    Wait,
    /// The frame is exhausted.
    Pop,
}

/// One concurrent interpreter instance, tied to one bullet.
pub(crate) struct ActionProcess<'a> {
    ticks: i64,
    stack: Vec<Frame<'a>>,
    wait_until: i64,
    change_speed: Ramp,
    change_direction: Ramp,
    accel_horizontal: Ramp,
    accel_vertical: Ramp,
    /// Kinematics of the most recent bullet this process spawned, for
    /// `sequence` semantics.
    last_shoot: Option<BulletState>,
}

impl<'a> ActionProcess<'a> {
    fn empty() -> Self {
        ActionProcess {
            ticks: 0,
            stack: Vec::new(),
            wait_until: -1,
            change_speed: Ramp::idle(),
            change_direction: Ramp::idle(),
            accel_horizontal: Ramp::idle(),
            accel_vertical: Ramp::idle(),
            last_shoot: None,
        }
    }

    pub(crate) fn rooted(action: &'a Action) -> Self {
        let mut process = Self::empty();
        process
            .stack
            .push(Frame::new(action, Rc::new(Parameters::default())));
        process
    }

    /// Advance the process one tick. Returns whether the process ended.
    pub(crate) fn tick(
        &mut self,
        bullet: &Rc<RefCell<BulletState>>,
        shared: &Rc<Shared<'a>>,
    ) -> Result<bool, RunError> {
        if self.ticks > self.wait_until {
            self.drain(bullet, shared)?;
        }

        {
            let mut bullet = bullet.borrow_mut();
            let ticks = self.ticks;
            self.change_speed.apply(ticks, &mut bullet.speed);
            self.change_direction.apply(ticks, &mut bullet.direction);
            self.accel_horizontal.apply(ticks, &mut bullet.accel_horizontal);
            self.accel_vertical.apply(ticks, &mut bullet.accel_vertical);
        }

        self.ticks += 1;

        let deadline = self
            .wait_until
            .max(self.change_speed.until)
            .max(self.change_direction.until)
            .max(self.accel_horizontal.until)
            .max(self.accel_vertical.until);

        Ok(self.stack.is_empty() && self.ticks > deadline)
    }

    /// Run frames until something waits, or the stack empties.
    fn drain(
        &mut self,
        bullet: &Rc<RefCell<BulletState>>,
        shared: &Rc<Shared<'a>>,
    ) -> Result<(), RunError> {
        while !self.stack.is_empty() {
            match self.dispatch(bullet, shared)? {
                Flow::Continue => {},
                Flow::Push(frame) => self.stack.push(frame),
                Flow::Wait => break,
                Flow::Pop => {
                    self.stack.pop();
                },
            }
        }

        Ok(())
    }

    /// Run the top frame's current command.
    fn dispatch(
        &mut self,
        bullet_cell: &Rc<RefCell<BulletState>>,
        shared: &Rc<Shared<'a>>,
    ) -> Result<Flow<'a>, RunError> {
        let Self {
            ticks,
            stack,
            wait_until,
            change_speed,
            change_direction,
            accel_horizontal,
            accel_vertical,
            last_shoot,
        } = self;

        let frame = stack.last_mut().expect("drain checked the stack");
        let action: &'a Action = frame.action;
        let step = match action.steps.get(frame.cursor) {
            Some(step) => step,
            None => return Ok(Flow::Pop),
        };

        match step {
            Step::Repeat(repeat) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                if frame.repeat.is_none() {
                    let times = eval(&repeat.times.value, &repeat.times.path, &ctx)?.value;
                    let times = if times.is_nan() || times < 1. {
                        0
                    } else {
                        times as i64
                    };
                    let resolved = resolve_ref(&repeat.action, &shared.tables, &caller, &ctx)?;
                    frame.repeat = Some(RepeatState {
                        times,
                        resolved: Some((resolved.entity, resolved.params)),
                        deterministic: resolved.deterministic,
                    });
                }
                let state = frame.repeat.as_mut().expect("initialized above");

                if frame.repeat_index < state.times {
                    let (action, params) = match state.resolved.take() {
                        Some(resolved) => resolved,
                        None => {
                            let resolved =
                                resolve_ref(&repeat.action, &shared.tables, &caller, &ctx)?;
                            (resolved.entity, resolved.params)
                        },
                    };
                    if state.deterministic {
                        state.resolved = Some((action, Rc::clone(&params)));
                    }

                    let params = Rc::new(params.with_loop_index(frame.repeat_index as Value));
                    frame.repeat_index += 1;
                    Ok(Flow::Push(Frame::new(action, params)))
                } else {
                    frame.repeat = None;
                    frame.repeat_index = 0;
                    frame.cursor += 1;
                    Ok(Flow::Continue)
                }
            },
            Step::Fire(fire_ref) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let resolved = resolve_ref(fire_ref, &shared.tables, &caller, &ctx)?;
                let fire: &'a Fire = resolved.entity;
                let fire_params = resolved.params;

                let fire_ctx = EvalContext::new(&fire_params, &snapshot, shared);
                let resolved = resolve_ref(&fire.bullet, &shared.tables, &fire_params, &fire_ctx)?;
                let bullet_node: &'a Bullet = resolved.entity;
                let bullet_params = resolved.params;

                let (sx, sy) = (snapshot.x, snapshot.y);

                // The first present of fire.direction and bullet.direction
                // wins, evaluated under the matching parameter scope.
                let selected = fire
                    .direction
                    .as_ref()
                    .map(|direction| (direction, &fire_params))
                    .or_else(|| {
                        bullet_node
                            .direction
                            .as_ref()
                            .map(|direction| (direction, &bullet_params))
                    });
                let direction = match selected {
                    Some((node, params)) => {
                        let ctx = EvalContext::new(params, &snapshot, shared);
                        let value = eval(&node.degrees, &node.path, &ctx)?.value.to_radians();
                        match node.kind {
                            DirectionKind::Aim => {
                                let (tx, ty) = shared.target_position()?;
                                value + (ty - sy).atan2(tx - sx)
                            },
                            DirectionKind::Absolute => value - FRAC_PI_2,
                            DirectionKind::Relative => value + snapshot.direction,
                            DirectionKind::Sequence => {
                                match last_shoot {
                                    Some(prev) => value + prev.direction,
                                    // Nothing to accumulate from yet; aim
                                    // straight at the target.
                                    None => {
                                        let (tx, ty) = shared.target_position()?;
                                        (ty - sy).atan2(tx - sx)
                                    },
                                }
                            },
                        }
                    },
                    None => {
                        let (tx, ty) = shared.target_position()?;
                        (ty - sy).atan2(tx - sx)
                    },
                };

                let selected = fire
                    .speed
                    .as_ref()
                    .map(|speed| (speed, &fire_params))
                    .or_else(|| {
                        bullet_node
                            .speed
                            .as_ref()
                            .map(|speed| (speed, &bullet_params))
                    });
                let speed = match selected {
                    Some((node, params)) => {
                        let ctx = EvalContext::new(params, &snapshot, shared);
                        let value = eval(&node.change, &node.path, &ctx)?.value;
                        match node.kind {
                            Change::Absolute => value,
                            Change::Relative => value + snapshot.speed,
                            Change::Sequence => {
                                match last_shoot {
                                    Some(prev) => value + prev.speed,
                                    None => shared.default_bullet_speed,
                                }
                            },
                        }
                    },
                    None => shared.default_bullet_speed,
                };

                let new_bullet = Rc::new(RefCell::new(BulletState {
                    x: sx,
                    y: sy,
                    speed,
                    direction,
                    ..BulletState::default()
                }));

                // One process runs every action of the bullet; frames go on
                // in reverse so the first listed action executes first.
                let mut process = ActionProcess::empty();
                let bullet_ctx = EvalContext::new(&bullet_params, &snapshot, shared);
                for action_or_ref in bullet_node.actions.iter().rev() {
                    let resolved =
                        resolve_ref(action_or_ref, &shared.tables, &bullet_params, &bullet_ctx)?;
                    process.stack.push(Frame::new(resolved.entity, resolved.params));
                }

                trace!("bullet fired at ({}, {})", sx, sy);

                let runner = Runner::fired(Rc::clone(shared), Rc::clone(&new_bullet), process);
                shared.bullet_fired(
                    runner,
                    &FireContext {
                        fire,
                        bullet: bullet_node,
                    },
                )?;

                *last_shoot = Some(new_bullet.borrow().clone());

                frame.cursor += 1;
                Ok(Flow::Continue)
            },
            Step::ChangeSpeed(change) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let term = eval(&change.term.value, &change.term.path, &ctx)?.value as i64;
                let value = eval(&change.speed.change, &change.speed.path, &ctx)?.value;

                *change_speed =
                    linear_ramp(change.speed.kind, value, snapshot.speed, term, *ticks + term);

                frame.cursor += 1;
                Ok(Flow::Continue)
            },
            Step::ChangeDirection(change) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let term = eval(&change.term.value, &change.term.path, &ctx)?.value as i64;
                let node = &change.direction;
                let value = eval(&node.degrees, &node.path, &ctx)?.value.to_radians();

                let until = *ticks + term;
                let towards = |target: f64| {
                    Ramp {
                        until,
                        delta: normalize_direction(target - snapshot.direction) / term as f64,
                        target: normalize_direction(target),
                    }
                };
                *change_direction = match node.kind {
                    DirectionKind::Absolute => towards(value - FRAC_PI_2),
                    DirectionKind::Aim => {
                        let (tx, ty) = shared.target_position()?;
                        towards(value + (ty - snapshot.y).atan2(tx - snapshot.x))
                    },
                    DirectionKind::Relative => towards(value + snapshot.direction),
                    // `sequence` turns by the value itself every tick.
                    DirectionKind::Sequence => Ramp {
                        until,
                        delta: normalize_direction(value),
                        target: normalize_direction(value * term as f64 + snapshot.direction),
                    },
                };

                frame.cursor += 1;
                Ok(Flow::Continue)
            },
            Step::Accel(accel) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let term = eval(&accel.term.value, &accel.term.path, &ctx)?.value as i64;
                let until = *ticks + term;

                *accel_horizontal = axis_ramp(
                    accel.horizontal.as_ref(),
                    snapshot.accel_horizontal,
                    term,
                    until,
                    &ctx,
                )?;
                *accel_vertical = axis_ramp(
                    accel.vertical.as_ref(),
                    snapshot.accel_vertical,
                    term,
                    until,
                    &ctx,
                )?;

                frame.cursor += 1;
                Ok(Flow::Continue)
            },
            Step::Wait(wait) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let frames = eval(&wait.frames, &wait.path, &ctx)?.value as i64;

                frame.cursor += 1;
                if frames > 0 {
                    *wait_until = *ticks + frames;
                    Ok(Flow::Wait)
                } else {
                    // A zero-frame wait consumes no ticks; the next command
                    // runs in the same tick.
                    Ok(Flow::Continue)
                }
            },
            Step::Vanish(_) => {
                bullet_cell.borrow_mut().vanished = true;

                frame.cursor += 1;
                Ok(Flow::Continue)
            },
            Step::Action(action_ref) => {
                let caller = Rc::clone(&frame.params);
                let snapshot = bullet_cell.borrow().clone();
                let ctx = EvalContext::new(&caller, &snapshot, shared);

                let resolved = resolve_ref(action_ref, &shared.tables, &caller, &ctx)?;

                frame.cursor += 1;
                Ok(Flow::Push(Frame::new(resolved.entity, resolved.params)))
            },
        }
    }
}
