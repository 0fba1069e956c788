//! The stabilizer registry: named, constrained rewrite functions with a
//! type-tagged dispatch.
//!
//! A [`Stabilizer`] binds either a single implementation or a
//! format-to-implementation map. The implementation kind (archive-level vs
//! entry-level, and which codec's view it takes) is carried by the
//! [`StabilizerFn`] variant, so dispatch never guesses. Binding an
//! implementation under a format outside its kind's format set is a
//! programmer error and panics at construction.

use rebuild_archive::{Format, GzipMeta, TarArchive, TarEntry, ZipArchive, ZipEntry};

use crate::context::StabilizationContext;

/// Composable applicability predicate over a [`StabilizationContext`].
/// Closed-world: these four variants are the whole constraint language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Applies everywhere.
    Always,
    /// Applies when the current archive has exactly this format.
    Format(Format),
    /// Applies when the current archive has any of these formats.
    Formats(Vec<Format>),
    /// Disjunction over other constraints.
    Any(Vec<Constraint>),
}

impl Constraint {
    pub fn matches(&self, ctx: &StabilizationContext) -> bool {
        match self {
            Constraint::Always => true,
            Constraint::Format(f) => ctx.format() == *f,
            Constraint::Formats(fs) => fs.contains(&ctx.format()),
            Constraint::Any(cs) => cs.iter().any(|c| c.matches(ctx)),
        }
    }
}

/// A concrete stabilization function, tagged by the view it operates on.
pub enum StabilizerFn {
    ZipArchive(Box<dyn Fn(&mut ZipArchive) + Send + Sync>),
    ZipEntry(Box<dyn Fn(&mut ZipEntry) + Send + Sync>),
    TarArchive(Box<dyn Fn(&mut TarArchive) + Send + Sync>),
    TarEntry(Box<dyn Fn(&mut TarEntry) + Send + Sync>),
    Gzip(Box<dyn Fn(&mut GzipMeta) + Send + Sync>),
}

impl StabilizerFn {
    /// The formats an implementation of this kind can ever run under.
    pub fn format_set(&self) -> &'static [Format] {
        match self {
            StabilizerFn::ZipArchive(_) | StabilizerFn::ZipEntry(_) => &[Format::Zip],
            StabilizerFn::TarArchive(_) | StabilizerFn::TarEntry(_) => {
                &[Format::Tar, Format::TarGz]
            }
            StabilizerFn::Gzip(_) => &[Format::Gzip, Format::TarGz],
        }
    }

    /// True for kinds that receive the whole archive exactly once.
    pub fn is_archive_level(&self) -> bool {
        matches!(
            self,
            StabilizerFn::ZipArchive(_) | StabilizerFn::TarArchive(_) | StabilizerFn::Gzip(_)
        )
    }
}

impl std::fmt::Debug for StabilizerFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            StabilizerFn::ZipArchive(_) => "ZipArchive",
            StabilizerFn::ZipEntry(_) => "ZipEntry",
            StabilizerFn::TarArchive(_) => "TarArchive",
            StabilizerFn::TarEntry(_) => "TarEntry",
            StabilizerFn::Gzip(_) => "Gzip",
        };
        write!(f, "StabilizerFn::{kind}")
    }
}

#[derive(Debug)]
enum Binding {
    Single(StabilizerFn),
    PerFormat(Vec<(Format, StabilizerFn)>),
}

/// A named, constrained stabilization rule.
#[derive(Debug)]
pub struct Stabilizer {
    name: String,
    constraints: Vec<Constraint>,
    binding: Binding,
}

impl Stabilizer {
    /// Binds a single implementation. Its kind's format set becomes an
    /// implied constraint.
    pub fn new(name: impl Into<String>, f: StabilizerFn) -> Self {
        Stabilizer {
            name: name.into(),
            constraints: Vec::new(),
            binding: Binding::Single(f),
        }
    }

    /// Binds one implementation per format.
    ///
    /// # Panics
    ///
    /// Panics when a format is outside its implementation kind's format set;
    /// that is a bug in the caller, not a runtime condition.
    pub fn per_format(name: impl Into<String>, map: Vec<(Format, StabilizerFn)>) -> Self {
        let name = name.into();
        for (format, f) in &map {
            assert!(
                f.format_set().contains(format),
                "stabilizer {name:?}: {f:?} cannot be bound under format {format}",
            );
        }
        Stabilizer {
            name,
            constraints: Vec::new(),
            binding: Binding::PerFormat(map),
        }
    }

    /// Adds an explicit constraint; the full set is a conjunction.
    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.constraints.push(c);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the implementation for a context, or `None` when this
    /// stabilizer does not apply there. Explicit constraints are checked
    /// first, then the constraint implied by the binding.
    pub fn fn_for(&self, ctx: &StabilizationContext) -> Option<&StabilizerFn> {
        if !self.constraints.iter().all(|c| c.matches(ctx)) {
            return None;
        }
        match &self.binding {
            Binding::Single(f) => f.format_set().contains(&ctx.format()).then_some(f),
            Binding::PerFormat(map) => map
                .iter()
                .find(|(format, _)| *format == ctx.format())
                .map(|(_, f)| f),
        }
    }
}

/// Runs stabilizers over a parsed ZIP archive, in caller order.
/// Archive-level passes run once and their reordering is visible to every
/// later pass; entry-level passes re-resolve per entry.
pub fn apply_zip(
    archive: &mut ZipArchive,
    ctx: &StabilizationContext,
    stabilizers: &[Stabilizer],
) {
    for s in stabilizers {
        match s.fn_for(ctx) {
            Some(StabilizerFn::ZipArchive(f)) => f(archive),
            Some(StabilizerFn::ZipEntry(_)) => {
                for entry in &mut archive.entries {
                    let ectx = ctx.with_entry(entry.name.clone());
                    if let Some(StabilizerFn::ZipEntry(f)) = s.fn_for(&ectx) {
                        f(entry);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Runs stabilizers over a parsed tar archive, in caller order.
pub fn apply_tar(
    archive: &mut TarArchive,
    ctx: &StabilizationContext,
    stabilizers: &[Stabilizer],
) {
    for s in stabilizers {
        match s.fn_for(ctx) {
            Some(StabilizerFn::TarArchive(f)) => f(archive),
            Some(StabilizerFn::TarEntry(_)) => {
                for entry in &mut archive.entries {
                    let ectx = ctx.with_entry(entry.name.clone());
                    if let Some(StabilizerFn::TarEntry(f)) = s.fn_for(&ectx) {
                        f(entry);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Runs gzip header stabilizers, in caller order.
pub fn apply_gzip(meta: &mut GzipMeta, ctx: &StabilizationContext, stabilizers: &[Stabilizer]) {
    for s in stabilizers {
        if let Some(StabilizerFn::Gzip(f)) = s.fn_for(ctx) {
            f(meta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tar_entry() -> StabilizerFn {
        StabilizerFn::TarEntry(Box::new(|_| {}))
    }

    #[test]
    fn constraints_compose() {
        let zip = StabilizationContext::root(Format::Zip);
        let tar = StabilizationContext::root(Format::Tar);
        assert!(Constraint::Always.matches(&zip));
        assert!(Constraint::Format(Format::Zip).matches(&zip));
        assert!(!Constraint::Format(Format::Zip).matches(&tar));
        assert!(Constraint::Formats(vec![Format::Tar, Format::TarGz]).matches(&tar));
        let any = Constraint::Any(vec![
            Constraint::Format(Format::Zip),
            Constraint::Format(Format::Tar),
        ]);
        assert!(any.matches(&zip) && any.matches(&tar));
    }

    #[test]
    fn binding_implies_format_constraint() {
        let s = Stabilizer::new("t", noop_tar_entry());
        assert!(s.fn_for(&StabilizationContext::root(Format::Tar)).is_some());
        assert!(s.fn_for(&StabilizationContext::root(Format::TarGz)).is_some());
        assert!(s.fn_for(&StabilizationContext::root(Format::Zip)).is_none());
    }

    #[test]
    fn explicit_constraints_narrow_the_binding() {
        let s = Stabilizer::new("t", noop_tar_entry())
            .with_constraint(Constraint::Format(Format::Tar));
        assert!(s.fn_for(&StabilizationContext::root(Format::Tar)).is_some());
        assert!(s.fn_for(&StabilizationContext::root(Format::TarGz)).is_none());
    }

    #[test]
    fn per_format_selects_by_context() {
        let s = Stabilizer::per_format(
            "multi",
            vec![
                (Format::Tar, noop_tar_entry()),
                (Format::Gzip, StabilizerFn::Gzip(Box::new(|_| {}))),
            ],
        );
        assert!(matches!(
            s.fn_for(&StabilizationContext::root(Format::Tar)),
            Some(StabilizerFn::TarEntry(_))
        ));
        assert!(matches!(
            s.fn_for(&StabilizationContext::root(Format::Gzip)),
            Some(StabilizerFn::Gzip(_))
        ));
        assert!(s.fn_for(&StabilizationContext::root(Format::Zip)).is_none());
    }

    #[test]
    #[should_panic(expected = "cannot be bound")]
    fn binding_outside_the_format_set_panics() {
        let _ = Stabilizer::per_format("bad", vec![(Format::Zip, noop_tar_entry())]);
    }

    #[test]
    fn archive_level_changes_are_visible_to_later_stabilizers() {
        use rebuild_archive::TarEntry;
        let mut archive = TarArchive {
            entries: vec![TarEntry::new("b", Vec::new()), TarEntry::new("a", Vec::new())],
        };
        let sort = Stabilizer::new(
            "sort",
            StabilizerFn::TarArchive(Box::new(|a| a.entries.sort_by(|x, y| x.name.cmp(&y.name)))),
        );
        let tag_first = Stabilizer::new(
            "tag-first",
            StabilizerFn::TarArchive(Box::new(|a| {
                let first = a.entries.first_mut().unwrap();
                first.uname = "first".into();
            })),
        );
        let ctx = StabilizationContext::root(Format::Tar);
        apply_tar(&mut archive, &ctx, &[sort, tag_first]);
        assert_eq!(archive.entries[0].name, "a");
        assert_eq!(archive.entries[0].uname, "first");
    }
}
