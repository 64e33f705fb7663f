//! Animation requests, frame timing and transition blending.

use crate::RagdollData;

pub const ANIM_ALL: u32 = 0x1FF;
pub const ANIM_INDEX: u32 = 0x1FF;
pub const ANIM_LOOP: u32 = 1 << 9;
pub const ANIM_CLAMP: u32 = 1 << 10;
pub const ANIM_REVERSE: u32 = 1 << 11;
pub const ANIM_START: u32 = ANIM_LOOP | ANIM_CLAMP;
pub const ANIM_END: u32 = ANIM_LOOP | ANIM_CLAMP | ANIM_REVERSE;
pub const ANIM_DIR: u32 = 0xE00;
pub const ANIM_SECONDARY: u32 = 12;
pub const ANIM_NOSKIN: u32 = 1 << 24;
pub const ANIM_SETTIME: u32 = 1 << 25;
pub const ANIM_FULLBRIGHT: u32 = 1 << 26;
pub const ANIM_NORENDER: u32 = 1 << 27;
pub const ANIM_RAGDOLL: u32 = 1 << 28;
pub const ANIM_SETSPEED: u32 = 1 << 29;
pub const ANIM_NOPITCH: u32 = 1 << 30;
pub const ANIM_FLAGS: u32 = 0xFF00_0000;

pub const MAX_ANIM_PARTS: usize = 3;

/// One clip binding registered on a part: frames `frame..frame + range` of the skeleton.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PartAnimSpec {
    pub frame: usize,
    pub range: usize,
    /// Frames per second; zero keeps the default speed.
    pub speed: f32,
    pub priority: i32,
}

/// Resolved description of what an animation part is playing.
#[derive(Copy, Clone, Debug)]
pub struct AnimInfo {
    pub anim: u32,
    pub frame: usize,
    pub range: usize,
    pub basetime: i32,
    /// Milliseconds per frame.
    pub speed: f32,
}

impl Default for AnimInfo {
    fn default() -> Self {
        Self {
            anim: 0,
            frame: 0,
            range: 0,
            basetime: 0,
            speed: 100.0,
        }
    }
}

impl PartialEq for AnimInfo {
    fn eq(&self, o: &Self) -> bool {
        self.frame == o.frame
            && self.range == o.range
            && (self.anim & (ANIM_SETTIME | ANIM_DIR)) == (o.anim & (ANIM_SETTIME | ANIM_DIR))
            && (self.anim & ANIM_SETTIME != 0 || self.basetime == o.basetime)
            && self.speed == o.speed
    }
}

/// Per-entity transition state for one animation part slot.
#[derive(Copy, Clone, Debug, Default)]
pub struct AnimInterp {
    pub prev: AnimInfo,
    pub cur: AnimInfo,
    pub last_switch: Option<i32>,
    pub last_model: Option<u32>,
}

impl AnimInterp {
    pub fn reset(&mut self) {
        self.last_switch = None;
    }

    /// Records `info` as the current animation, moving the old one to `prev` when the switch
    /// happens far enough from the last one. `aitime` is the transition length in ms.
    pub fn update(
        &mut self,
        model: u32,
        info: &AnimInfo,
        millis: i32,
        last_rendered: i32,
        aitime: i32,
    ) {
        match self.last_switch {
            Some(_) if self.last_model == Some(model) && millis - last_rendered <= aitime => {
                if self.cur != *info {
                    if self
                        .last_switch
                        .is_some_and(|last| millis - last > aitime / 2)
                    {
                        self.prev = self.cur;
                    }
                    self.cur = *info;
                    self.last_switch = Some(millis);
                } else if info.anim & ANIM_SETTIME != 0 {
                    self.cur.basetime = info.basetime;
                }
            }
            _ => {
                self.prev = *info;
                self.cur = *info;
                self.last_switch = Some(millis - aitime * 2);
            }
        }
        self.last_model = Some(model);
    }
}

/// Frame pair and blend fraction for one clip at one instant.
#[derive(Copy, Clone, Debug, Default)]
pub struct AnimPos {
    pub anim: u32,
    pub fr1: usize,
    pub fr2: usize,
    pub t: f32,
}

impl PartialEq for AnimPos {
    fn eq(&self, o: &Self) -> bool {
        self.fr1 == o.fr1 && self.fr2 == o.fr2 && (self.fr1 == self.fr2 || self.t == o.t)
    }
}

impl AnimPos {
    pub fn from_info(info: &AnimInfo, millis: i32) -> Self {
        let mut pos = AnimPos {
            anim: info.anim,
            ..AnimPos::default()
        };
        let mut fr1 = 0usize;
        if info.range > 1 {
            let time = if info.anim & ANIM_SETTIME != 0 {
                info.basetime
            } else {
                millis - info.basetime
            };
            let time = time.max(0) as f32;
            let whole = (time / info.speed).floor();
            fr1 = whole as usize;
            pos.t = (time - whole * info.speed) / info.speed;
        }
        if info.anim & ANIM_LOOP != 0 {
            pos.fr1 = fr1 % info.range.max(1) + info.frame;
            pos.fr2 = pos.fr1 + 1;
            if pos.fr2 >= info.frame + info.range {
                pos.fr2 = info.frame;
            }
        } else {
            let last = info.frame + info.range.max(1) - 1;
            pos.fr1 = fr1.min(info.range.max(1) - 1) + info.frame;
            pos.fr2 = (pos.fr1 + 1).min(last);
        }
        if info.anim & ANIM_REVERSE != 0 {
            let last = info.frame + info.range.max(1) - 1;
            pos.fr1 = last - (pos.fr1 - info.frame);
            pos.fr2 = last - (pos.fr2 - info.frame);
        }
        pos
    }
}

/// What one animation part of a rendered instance shows this frame.
#[derive(Copy, Clone, Debug)]
pub struct AnimState {
    pub anim: u32,
    pub cur: AnimPos,
    pub prev: AnimPos,
    /// 1.0 once the transition from `prev` has finished.
    pub interp: f32,
}

impl Default for AnimState {
    fn default() -> Self {
        Self {
            anim: 0,
            cur: AnimPos::default(),
            prev: AnimPos::default(),
            interp: 1.0,
        }
    }
}

impl PartialEq for AnimState {
    fn eq(&self, o: &Self) -> bool {
        self.cur == o.cur
            && if self.interp < 1.0 {
                self.interp == o.interp && self.prev == o.prev
            } else {
                o.interp >= 1.0
            }
    }
}

impl AnimState {
    /// Plays a single frame with no transition.
    pub fn still(frame: usize) -> Self {
        Self {
            cur: AnimPos {
                fr1: frame,
                fr2: frame,
                ..AnimPos::default()
            },
            ..Self::default()
        }
    }
}

/// Per-entity animation and ragdoll state, owned by the caller and passed to each render.
#[derive(Debug, Default)]
pub struct EntityState {
    pub anim_interp: [AnimInterp; MAX_ANIM_PARTS],
    pub last_rendered: i32,
    /// Seed picking between alternative clips registered for the same animation.
    pub variant_seed: u32,
    pub ragdoll: Option<RagdollData>,
}

/// Animation names known to the game, indexed by animation number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnimNames {
    pub names: Vec<String>,
}

impl Default for AnimNames {
    fn default() -> Self {
        Self::new([
            "mapmodel", "dead", "dying", "idle", "forward", "backward", "left", "right", "pain",
            "jump", "sink", "swim", "edit", "lag", "taunt", "win", "lose", "gun idle",
            "gun shoot", "vwep idle", "vwep shoot", "trigger",
        ])
    }
}

impl AnimNames {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Animation numbers matching `pattern`. Names match in table order first, then the bare
    /// numbers `0..=ANIM_ALL` in ascending order; a number can appear twice.
    pub fn find(&self, pattern: &str) -> Vec<u32> {
        let named = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, n)| match_anim(n, pattern))
            .map(|(i, _)| i as u32);
        let numbered = (0..=ANIM_ALL).filter(|i| match_anim(&i.to_string(), pattern));
        named.chain(numbered).collect()
    }
}

/// Matches an animation name against `|`-separated alternatives, where `*` stands for one
/// space-free word.
pub fn match_anim(name: &str, pattern: &str) -> bool {
    pattern.split('|').any(|alt| {
        let mut s = name;
        for c in alt.chars() {
            if c == '*' {
                let word = s.find(char::is_whitespace).unwrap_or(s.len());
                if word == 0 {
                    return false;
                }
                s = &s[word..];
            } else if let Some(rest) = s.strip_prefix(c) {
                s = rest;
            } else {
                return false;
            }
        }
        s.is_empty()
    })
}
