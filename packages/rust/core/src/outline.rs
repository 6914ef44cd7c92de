//! Outline flattening into independently researched work units.

use sourcestream_shared::{Outline, WorkUnit};

/// Flatten an outline into its work units.
///
/// A heading with subsections yields one unit per subsection. A heading with
/// none yields a single unit that stands in for itself: its title doubles as
/// the subsection title and `is_direct_heading` is set, so no heading is ever
/// silently dropped.
pub fn flatten_outline(outline: &Outline) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    for (heading_index, heading) in outline.0.iter().enumerate() {
        if heading.subsections.is_empty() {
            units.push(WorkUnit {
                heading_index,
                subsection_index: 0,
                heading_title: heading.title.clone(),
                subsection_title: heading.title.clone(),
                is_direct_heading: true,
            });
            continue;
        }
        for (subsection_index, subsection) in heading.subsections.iter().enumerate() {
            units.push(WorkUnit {
                heading_index,
                subsection_index,
                heading_title: heading.title.clone(),
                subsection_title: subsection.clone(),
                is_direct_heading: false,
            });
        }
    }
    units
}
