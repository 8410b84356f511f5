//! Annotation link registry
//!
//! Maps a container type tag to the constructor of its annotation link, so
//! callers can link an annotation to any annotatable container without
//! branching on the parent's type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mock::ObjRef;

/// Link between an annotatable parent and an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationLink {
    /// e.g. `DatasetAnnotationLink`
    pub link_type: String,
    pub parent: ObjRef,
    pub annotation: ObjRef,
}

/// Builds the link for one parent type
pub type LinkConstructor = fn(parent: ObjRef, annotation: ObjRef) -> AnnotationLink;

macro_rules! link_constructor {
    ($name:ident, $link_type:literal) => {
        fn $name(parent: ObjRef, annotation: ObjRef) -> AnnotationLink {
            AnnotationLink {
                link_type: $link_type.to_string(),
                parent,
                annotation,
            }
        }
    };
}

link_constructor!(project_link, "ProjectAnnotationLink");
link_constructor!(dataset_link, "DatasetAnnotationLink");
link_constructor!(image_link, "ImageAnnotationLink");
link_constructor!(screen_link, "ScreenAnnotationLink");
link_constructor!(plate_link, "PlateAnnotationLink");
link_constructor!(plate_acquisition_link, "PlateAcquisitionAnnotationLink");
link_constructor!(well_link, "WellAnnotationLink");
link_constructor!(folder_link, "FolderAnnotationLink");

/// Type tag → link constructor
#[derive(Debug, Clone)]
pub struct LinkRegistry {
    constructors: BTreeMap<&'static str, LinkConstructor>,
}

impl Default for LinkRegistry {
    fn default() -> Self {
        let mut constructors: BTreeMap<&'static str, LinkConstructor> = BTreeMap::new();
        constructors.insert("Project", project_link);
        constructors.insert("Dataset", dataset_link);
        constructors.insert("Image", image_link);
        constructors.insert("Screen", screen_link);
        constructors.insert("Plate", plate_link);
        constructors.insert("PlateAcquisition", plate_acquisition_link);
        constructors.insert("Well", well_link);
        constructors.insert("Folder", folder_link);
        Self { constructors }
    }
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructor registered for `type_tag`
    pub fn constructor(&self, type_tag: &str) -> Option<LinkConstructor> {
        self.constructors.get(type_tag).copied()
    }

    /// Link `annotation` to `parent`; `None` if the parent type is not annotatable
    pub fn link(&self, parent: ObjRef, annotation: ObjRef) -> Option<AnnotationLink> {
        let construct = self.constructor(&parent.type_name)?;
        Some(construct(parent, annotation))
    }

    pub fn supports(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}
