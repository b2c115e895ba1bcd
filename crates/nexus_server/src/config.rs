//! Tuning knobs of the world runtime. None of these are part of the wire
//! contract; deployments override them freely.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// AI and periodic-effect cadence. Players observe combat at this
    /// resolution.
    pub tick_interval: Duration,
    /// Spatial-grid cell edge, in game units.
    pub cell_size: f32,
    /// Interest radius for event broadcasts.
    pub broadcast_radius: f32,
    /// Movement updates travel further than events so distant silhouettes
    /// keep walking; this is the low-priority traffic shed first under
    /// mailbox pressure.
    pub movement_broadcast_radius: f32,
    pub say_radius: f32,
    pub yell_radius: f32,
    /// Range within which a unit can be interacted with.
    pub interact_radius: f32,
    /// Creatures served per AI tick; the rest resume round-robin next
    /// tick.
    pub creature_budget: usize,
    /// Mailbox depth above which movement broadcasts are clamped back to
    /// twice the broadcast radius.
    pub mailbox_watermark: usize,
    /// Per-class speed cap for client movement, units per second.
    pub move_speed_cap: f32,
    /// Slack added on top of the speed cap per packet.
    pub move_tolerance: f32,
    /// Reach within which a creature swings instead of chasing.
    pub melee_range: f32,
    /// Chase speed toward the current target, units per tick.
    pub chase_step: f32,
    /// Evade walk-back speed, units per tick.
    pub evade_step: f32,
    /// Distance from spawn at which an evading creature snaps home.
    pub evade_arrive_distance: f32,
    /// Combat without progress beyond this transitions to evade.
    pub combat_timeout: Duration,
    /// Extra reach allowed on spell range checks.
    pub range_tolerance: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            cell_size: 50.0,
            broadcast_radius: 100.0,
            movement_broadcast_radius: 250.0,
            say_radius: 25.0,
            yell_radius: 100.0,
            interact_radius: 10.0,
            creature_budget: 100,
            mailbox_watermark: 1024,
            move_speed_cap: 10.0,
            move_tolerance: 2.0,
            melee_range: 5.0,
            chase_step: 7.0,
            evade_step: 5.0,
            evade_arrive_distance: 2.0,
            combat_timeout: Duration::from_secs(30),
            range_tolerance: 1.0,
        }
    }
}
