// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

use crate::data::{Bullet, BulletML, Element, ElementPath, ExpressionError, Fire};
use crate::run::process::ActionProcess;
use crate::run::table::DefTables;

/// An error from a host hook, propagated unchanged out of
/// [`Runner::update`].
pub type HostError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The hook invoked when a new bullet is spawned.
///
/// The host receives the new bullet's [`Runner`] and owns it from then on;
/// the bullet only moves while the host keeps calling
/// [`Runner::update`] on it once per frame. Dropping the runner drops the
/// bullet.
pub type FiredHook<'a> =
    Box<dyn FnMut(Runner<'a>, &FireContext<'a>) -> Result<(), HostError> + 'a>;

/// A hook producing a position in host units.
pub type PositionHook<'a> = Box<dyn FnMut() -> Result<(f64, f64), HostError> + 'a>;

/// An error while running a document.
#[derive(Debug, Error)]
pub enum RunError {
    /// A reference used a label with no definition in the document.
    #[error("<{} label=\"{}\"> not found (in {})", kind, label, path)]
    UnresolvedLabel {
        /// The reference element name.
        kind: &'static str,
        /// The label which failed to resolve.
        label: String,
        /// The trail of elements leading to the reference.
        path: ElementPath,
    },
    /// An expression could not be evaluated.
    #[error("{} (in {})", source, path)]
    Expression {
        /// The trail of elements leading to the expression.
        path: ElementPath,
        /// The evaluation error.
        source: ExpressionError,
    },
    /// A host hook failed.
    #[error("host hook failed")]
    Host(#[source] HostError),
}

/// The kinematic state of one bullet.
#[derive(Debug, Clone, Default)]
pub(crate) struct BulletState {
    pub(crate) x: f64,
    pub(crate) y: f64,
    /// Units per tick.
    pub(crate) speed: f64,
    /// Radians; `0` is the `+x` axis.
    pub(crate) direction: f64,
    pub(crate) accel_horizontal: f64,
    pub(crate) accel_vertical: f64,
    pub(crate) vanished: bool,
}

/// What caused a bullet to be spawned.
pub struct FireContext<'a> {
    /// The `fire` element which spawned the bullet.
    pub fire: &'a Fire,
    /// The `bullet` element the new bullet was created from.
    pub bullet: &'a Bullet,
}

/// Options for creating a runner.
pub struct RunnerOptions<'a> {
    /// Called synchronously whenever a new bullet is spawned.
    pub on_bullet_fired: FiredHook<'a>,
    /// The current position of the shooter; queried once per tick to
    /// reposition the emitter.
    pub current_shoot_position: PositionHook<'a>,
    /// The current position of the target; queried whenever `aim` is
    /// evaluated.
    pub current_target_position: PositionHook<'a>,
    /// Fallback speed when neither `fire` nor `bullet` give one. Zero is
    /// treated as `1.0`.
    pub default_bullet_speed: f64,
    /// The source for `$rand`. Absent, a time-seeded generator is used.
    pub random: Option<Box<dyn RngCore + 'a>>,
    /// The value of `$rank`, the host-supplied difficulty scalar.
    pub rank: f64,
}

pub(crate) struct Hooks<'a> {
    on_bullet_fired: FiredHook<'a>,
    current_shoot_position: PositionHook<'a>,
    current_target_position: PositionHook<'a>,
}

/// Context shared by every runner spawned from one document.
pub(crate) struct Shared<'a> {
    pub(crate) tables: DefTables<'a>,
    hooks: RefCell<Hooks<'a>>,
    rng: RefCell<Box<dyn RngCore + 'a>>,
    pub(crate) default_bullet_speed: f64,
    pub(crate) rank: f64,
}

impl<'a> Shared<'a> {
    pub(crate) fn shoot_position(&self) -> Result<(f64, f64), RunError> {
        (self.hooks.borrow_mut().current_shoot_position)().map_err(RunError::Host)
    }

    pub(crate) fn target_position(&self) -> Result<(f64, f64), RunError> {
        (self.hooks.borrow_mut().current_target_position)().map_err(RunError::Host)
    }

    pub(crate) fn bullet_fired(
        &self,
        runner: Runner<'a>,
        context: &FireContext<'a>,
    ) -> Result<(), RunError> {
        let mut hooks = self.hooks.borrow_mut();
        (hooks.on_bullet_fired)(runner, context).map_err(RunError::Host)
    }

    pub(crate) fn rand(&self) -> f64 {
        let mut rng = self.rng.borrow_mut();
        rng.gen()
    }
}

/// Runs a BulletML document for one bullet, or for the top-level emitter.
///
/// [`Runner::new`] builds the emitter runner; every bullet it spawns gets a
/// runner of its own, handed to the host through
/// [`RunnerOptions::on_bullet_fired`]. Each runner must be updated once per
/// frame by whoever owns it.
pub struct Runner<'a> {
    shared: Rc<Shared<'a>>,
    bullet: Rc<RefCell<BulletState>>,
    emitter: bool,
    processes: Vec<ActionProcess<'a>>,
}

impl<'a> Runner<'a> {
    /// Create the top-level runner for a document.
    ///
    /// Every top-level action whose label starts with `top` (ASCII
    /// case-insensitive) becomes an entry point.
    pub fn new(document: &'a BulletML, options: RunnerOptions<'a>) -> Result<Self, RunError> {
        let RunnerOptions {
            on_bullet_fired,
            current_shoot_position,
            current_target_position,
            default_bullet_speed,
            random,
            rank,
        } = options;

        let default_bullet_speed = if default_bullet_speed == 0. {
            1.0
        } else {
            default_bullet_speed
        };
        let random = random.unwrap_or_else(|| {
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0);
            Box::new(Pcg64Mcg::seed_from_u64(seed))
        });

        let shared = Rc::new(Shared {
            tables: DefTables::new(document),
            hooks: RefCell::new(Hooks {
                on_bullet_fired,
                current_shoot_position,
                current_target_position,
            }),
            rng: RefCell::new(random),
            default_bullet_speed,
            rank,
        });

        let mut runner = Runner {
            shared,
            bullet: Rc::new(RefCell::new(BulletState::default())),
            emitter: true,
            processes: Vec::new(),
        };

        for element in &document.elements {
            if let Element::Action(action) = element {
                let is_top = action
                    .label
                    .as_deref()
                    .and_then(|label| label.get(..3))
                    .map_or(false, |prefix| prefix.eq_ignore_ascii_case("top"));
                if is_top {
                    trace!(
                        "creating action process for `{}`",
                        action.label.as_deref().unwrap_or(""),
                    );
                    runner.processes.push(ActionProcess::rooted(action));
                }
            }
        }

        let (x, y) = runner.shared.shoot_position()?;
        {
            let mut bullet = runner.bullet.borrow_mut();
            bullet.x = x;
            bullet.y = y;
        }

        debug!(
            "runner created with {} top-level action processes",
            runner.processes.len(),
        );

        Ok(runner)
    }

    pub(crate) fn fired(
        shared: Rc<Shared<'a>>,
        bullet: Rc<RefCell<BulletState>>,
        process: ActionProcess<'a>,
    ) -> Self {
        Runner {
            shared,
            bullet,
            emitter: false,
            processes: vec![process],
        }
    }

    /// Run one tick.
    ///
    /// Every action process advances one tick and is reaped once its frame
    /// stack and timed modifiers have drained. Afterwards the bullet
    /// integrates its velocity, or, for the emitter, is repositioned from
    /// the host's shoot position.
    ///
    /// The first error aborts the call; processes which already ran their
    /// tick keep their new state.
    pub fn update(&mut self) -> Result<(), RunError> {
        let Self {
            shared,
            bullet,
            emitter,
            processes,
        } = self;

        let mut failure = None;
        processes.retain_mut(|process| {
            if failure.is_some() {
                return true;
            }
            match process.tick(bullet, shared) {
                Ok(ended) => !ended,
                Err(err) => {
                    failure = Some(err);
                    true
                },
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        if *emitter {
            let (x, y) = shared.shoot_position()?;
            let mut bullet = bullet.borrow_mut();
            bullet.x = x;
            bullet.y = y;
        } else {
            let mut bullet = bullet.borrow_mut();
            if !bullet.vanished {
                let step_x = bullet.speed * bullet.direction.cos() + bullet.accel_horizontal;
                let step_y = bullet.speed * bullet.direction.sin() + bullet.accel_vertical;
                bullet.x += step_x;
                bullet.y += step_y;
            }
        }

        Ok(())
    }

    /// The bullet's current position.
    pub fn position(&self) -> (f64, f64) {
        let bullet = self.bullet.borrow();
        (bullet.x, bullet.y)
    }

    /// Whether the bullet has vanished.
    pub fn vanished(&self) -> bool {
        self.bullet.borrow().vanished
    }
}
