pub mod atlas_data;
pub mod error;
pub mod runtime;
pub mod shared_types;
pub mod skeleton_data;

#[cfg(test)]
mod tests {
    use crate::atlas_data::Atlas;
    use crate::skeleton_data::animation::RawCurve;
    use crate::skeleton_data::bone::TransformMode;
    use crate::skeleton_data::skin::RawAttachment;
    use crate::skeleton_data::RawSkeletonData;

    #[test]
    fn test_deserialization_of_simple_skeleton_file() {
        let bytes = include_bytes!("test_assets/orb.json");
        let skeleton_data: RawSkeletonData = serde_json::from_slice(bytes).unwrap();
        assert_eq!(skeleton_data.bones.len(), 1);
        assert_eq!(skeleton_data.slots.len(), 1);
        assert_eq!(skeleton_data.animations.len(), 1);
        let spin = &skeleton_data.animations["spin"];
        assert_eq!(spin.bones["root"].rotate.len(), 3);
    }

    #[test]
    fn test_deserialization_of_composite_skeleton_file() {
        let bytes = include_bytes!("test_assets/hero.json");
        let skeleton_data: RawSkeletonData = serde_json::from_slice(bytes).unwrap();
        assert_eq!(skeleton_data.skeleton.version, "3.8.75");
        assert_eq!(skeleton_data.bones.len(), 6);
        assert_eq!(skeleton_data.slots.len(), 3);
        assert_eq!(skeleton_data.ik.len(), 1);
        assert_eq!(skeleton_data.skins.len(), 1);

        let hand = &skeleton_data.bones[4];
        assert_eq!(hand.name, "hand");
        assert_eq!(hand.transform, TransformMode::NoScale);
        assert!(!hand.transform.inherits_scale());
        assert!(hand.transform.inherits_rotation());

        let ik = &skeleton_data.ik[0];
        assert_eq!(ik.bones, vec!["arm".to_string(), "hand".to_string()]);
        assert!(!ik.bend_positive);
        assert!((ik.mix - 0.9).abs() < 1e-6);

        // Animations arrive ordered by name.
        let names: Vec<&str> = skeleton_data.animations.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["idle", "wave"]);
    }

    #[test]
    fn test_attachment_tagging() {
        let bytes = include_bytes!("test_assets/hero.json");
        let skeleton_data: RawSkeletonData = serde_json::from_slice(bytes).unwrap();
        let skin = &skeleton_data.skins[0];

        // An untagged attachment defaults to a region.
        match &skin.attachments["arm"]["arm"] {
            RawAttachment::Region { width, height, .. } => {
                assert_eq!(*width, 40.0);
                assert_eq!(*height, 20.0);
            }
            other => panic!("expected region, got {:?}", other),
        }

        // Weighted meshes keep the raw influence stream.
        match &skin.attachments["torso"]["torso"] {
            RawAttachment::Mesh { uvs, vertices, triangles, .. } => {
                assert_eq!(uvs.len(), 8);
                assert_eq!(triangles.len(), 6);
                assert_ne!(vertices.len(), uvs.len());
            }
            other => panic!("expected mesh, got {:?}", other),
        }

        let hand = &skin.attachments["hand"];
        assert_eq!(hand.len(), 3);
        match &hand["fist"] {
            RawAttachment::Region { path: Some(path), .. } => assert_eq!(path, "hand_fist"),
            other => panic!("expected region with a path, got {:?}", other),
        }
        assert!(matches!(&hand["hitbox"], RawAttachment::BoundingBox { vertex_count: 3, .. }));
    }

    #[test]
    fn test_timeline_curves() {
        let bytes = include_bytes!("test_assets/hero.json");
        let skeleton_data: RawSkeletonData = serde_json::from_slice(bytes).unwrap();

        let idle = &skeleton_data.animations["idle"];
        let rotate = &idle.bones["torso"].rotate;
        assert_eq!(rotate.len(), 3);
        assert_eq!(rotate[0].curve, RawCurve::Bezier([0.25, 0.0, 0.75, 1.0]));
        assert_eq!(rotate[1].curve, RawCurve::Linear);

        let translate = &idle.bones["hip"].translate;
        assert_eq!(translate[1].curve, RawCurve::Stepped);
        assert_eq!(translate[1].y, -4.0);

        let wave = &skeleton_data.animations["wave"];
        let scale = &wave.bones["arm"].scale;
        assert_eq!(scale[0].x, 1.0);
        assert_eq!(scale[1].x, 1.1);

        let attachment = &wave.slots["hand"].attachment;
        assert_eq!(attachment[1].name.as_deref(), Some("fist"));
        assert!(attachment[2].name.is_none());

        let color = &idle.slots["arm"].color;
        assert!((color[1].color.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_deserialization_of_atlases() {
        let hero_atlas = Atlas::parse(include_str!("test_assets/hero.atlas")).unwrap();
        assert_eq!(hero_atlas.pages.len(), 1);
        assert_eq!(hero_atlas.pages[0].name, "hero.png");
        assert_eq!(hero_atlas.pages[0].regions.len(), 4);

        let (_, fist) = hero_atlas.find_region("hand_fist").unwrap();
        assert!(fist.rotate);
        assert_eq!(fist.rect.width, 20.0);
        assert_eq!(fist.orig.x, 24.0);
        assert_eq!(fist.offset.y, 2.0);

        let orb_atlas = Atlas::parse(include_str!("test_assets/orb.atlas")).unwrap();
        assert!(orb_atlas.find_region("orb").is_some());
        assert!(orb_atlas.find_region("missing").is_none());
    }
}
